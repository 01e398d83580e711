use anyhow::{Context, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use std::{thread, time::Duration};

use crate::models::Settings;

const DEFAULT_DB_PATH: &str = "quillchat.db";
const SETTINGS_KEY: &str = "plugin_data";
const TELEMETRY_KEY: &str = "telemetry_enabled";

/**
 * \brief 默认数据库路径（本地目录下的 quillchat.db，可用 QUILLCHAT_DB 覆盖）。
 */
pub fn default_db_path() -> String {
    std::env::var("QUILLCHAT_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

/**
 * \brief 打开默认数据库文件。
 */
pub fn open_default_db() -> Result<Connection> {
    open_db(&default_db_path())
}

pub fn open_db(path: &str) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("open {}", path))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建宿主键值存储表。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief 读取插件设置，持久化字段覆盖默认值。
 * \details 未存储或存储为 JSON null 时返回默认设置；内容损坏时返回错误。
 */
pub fn load_settings(conn: &Connection) -> Result<Settings> {
    let raw = get_config(conn, SETTINGS_KEY)?;
    let Some(raw) = raw else {
        return Ok(Settings::default());
    };
    let value: Value = serde_json::from_str(&raw).context("stored settings are not valid JSON")?;
    if value.is_null() {
        return Ok(Settings::default());
    }
    serde_json::from_value(value).context("stored settings have an unexpected shape")
}

/**
 * \brief 持久化完整的设置记录。
 */
pub fn save_settings(conn: &Connection, settings: &Settings) -> Result<()> {
    let raw = serde_json::to_string(settings)?;
    set_config(conn, SETTINGS_KEY, &raw)
}

/**
 * \brief 设置面板编辑 API Key：读取、替换、保存。不校验格式，空值同样允许。
 */
pub fn set_api_key(conn: &Connection, api_key: &str) -> Result<Settings> {
    let mut settings = load_settings(conn)?;
    settings.api_key = api_key.to_string();
    save_settings(conn, &settings)?;
    Ok(settings)
}

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    Ok(get_config(conn, TELEMETRY_KEY)?
        .map(|s| s == "1")
        .unwrap_or(false))
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_config(conn, TELEMETRY_KEY, if enabled { "1" } else { "0" })
}

fn set_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

fn get_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val)
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并线性退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
