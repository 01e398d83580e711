use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db,
    llm::{self, CompletionClient, CompletionError},
    models::{ChatRequest, ChatResponse, Settings},
    telemetry,
};

type ApiError = (StatusCode, String);

/**
 * \brief 服务共享状态：数据库路径与上游补全地址。
 */
#[derive(Debug, Clone)]
pub struct AppState {
    pub db_path: String,
    pub endpoint: String,
    pub http: reqwest::Client,
}

impl AppState {
    /**
     * \brief 从环境变量构造（QUILLCHAT_DB / QUILLCHAT_ENDPOINT）。
     */
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_path: db::default_db_path(),
            endpoint: std::env::var("QUILLCHAT_ENDPOINT")
                .unwrap_or_else(|_| llm::DEFAULT_ENDPOINT.to_string()),
            http: reqwest::Client::builder().build()?,
        })
    }

    fn open_db(&self) -> Result<rusqlite::Connection, ApiError> {
        let conn = db::open_db(&self.db_path).map_err(internal_err)?;
        db::migrate(&conn).map_err(internal_err)?;
        Ok(conn)
    }
}

/**
 * \brief 启动本地 HTTP 服务，替代宿主的对话框与设置面板。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str) -> Result<()> {
    let app = router(AppState::from_env()?);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/chat", post(chat))
        .with_state(state)
}

/**
 * \brief 对外展示的设置视图，不回传明文 Key。
 */
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub my_setting: String,
    pub has_api_key: bool,
    pub telemetry_enabled: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SettingsInput {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    my_setting: Option<String>,
    #[serde(default)]
    telemetry_enabled: Option<bool>,
}

fn settings_view(settings: &Settings, telemetry_enabled: bool) -> SettingsView {
    SettingsView {
        my_setting: settings.my_setting.clone(),
        has_api_key: !settings.api_key.is_empty(),
        telemetry_enabled,
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<SettingsView>, ApiError> {
    let conn = state.open_db()?;
    let settings = db::load_settings(&conn).map_err(internal_err)?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).map_err(internal_err)?;
    Ok(Json(settings_view(&settings, telemetry_enabled)))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(input): Json<SettingsInput>,
) -> Result<Json<SettingsView>, ApiError> {
    let conn = state.open_db()?;
    let mut settings = db::load_settings(&conn).map_err(internal_err)?;
    if let Some(key) = input.api_key {
        settings.api_key = key;
    }
    if let Some(value) = input.my_setting {
        settings.my_setting = value;
    }
    db::save_settings(&conn, &settings).map_err(internal_err)?;
    if let Some(enabled) = input.telemetry_enabled {
        db::set_telemetry_enabled(&conn, enabled).map_err(internal_err)?;
        telemetry::set_enabled(enabled);
    }
    let telemetry_enabled = db::get_telemetry_enabled(&conn).map_err(internal_err)?;
    telemetry::log_event("server.settings", "settings saved");
    Ok(Json(settings_view(&settings, telemetry_enabled)))
}

/**
 * \brief 单轮对话：每次请求按已保存的 Key 构造客户端。
 */
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let settings = {
        let conn = state.open_db()?;
        db::load_settings(&conn).map_err(internal_err)?
    };
    let client = CompletionClient::new(settings.api_key)
        .map_err(upstream_err)?
        .with_http_client(state.http.clone())
        .with_endpoint(state.endpoint.clone());
    let reply = client
        .complete_request(&request)
        .await
        .map_err(upstream_err)?;
    Ok(Json(reply))
}

fn upstream_err(err: CompletionError) -> ApiError {
    telemetry::log_error("server.chat", &err.to_string());
    match &err {
        CompletionError::InvalidApiKey => (StatusCode::BAD_REQUEST, err.to_string()),
        CompletionError::Status { status, .. } => {
            (StatusCode::BAD_GATEWAY, format!("upstream returned {}", status))
        }
        other => (StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

fn internal_err<E: std::fmt::Display>(err: E) -> ApiError {
    telemetry::log_error("server", &err.to_string());
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
