use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use quillchat_core_sdk::prelude::*;

/**
 * \brief CLI 程序入口：设置面板、聊天对话框与本地服务。
 */
#[derive(Parser, Debug)]
#[command(name = "quillchat", version, about = "QuillChat: chat with a completion endpoint")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 保存 API Key 与遥测开关。
     * \param api_key API Key（不校验格式）
     */
    Init {
        #[arg(long)]
        api_key: String,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /**
     * \brief 显示当前设置（Key 已遮蔽）。
     */
    Settings,

    /**
     * \brief 发送一条消息；不带 --prompt 时进入交互对话，输入 /quit 退出。
     */
    Chat {
        #[arg(long)]
        prompt: Option<String>,
        /** \brief 覆盖补全接口地址 */
        #[arg(long)]
        endpoint: Option<String>,
    },

    /**
     * \brief 启动本地 HTTP 服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = db::open_default_db().context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Init {
            api_key,
            enable_telemetry,
        } => {
            db::set_api_key(&conn, &api_key).context("save settings failed")?;
            db::set_telemetry_enabled(&conn, enable_telemetry)
                .context("save telemetry failed")?;
            telemetry::set_enabled(enable_telemetry);
            println!("Saved settings (api key {})", mask_key(&api_key));
        }
        Commands::Settings => {
            let settings = db::load_settings(&conn).context("load settings failed")?;
            println!("mySetting = {}", settings.my_setting);
            println!("apiKey    = {}", mask_key(&settings.api_key));
            println!("telemetry = {}", telemetry_enabled);
        }
        Commands::Chat { prompt, endpoint } => {
            let settings = db::load_settings(&conn).context("load settings failed")?;
            drop(conn);

            let mut client =
                CompletionClient::new(settings.api_key).context("build http client failed")?;
            if let Some(endpoint) = endpoint {
                client = client.with_endpoint(endpoint);
            }
            let mut session = ChatSession::new(client);

            match prompt {
                Some(prompt) => {
                    telemetry::log_event("cli.chat", &format!("prompt_len={}", prompt.len()));
                    session.send(&prompt).await.context("chat request failed")?;
                    println!("{}", session.render());
                }
                None => {
                    let stdin = BufReader::new(tokio::io::stdin());
                    interactive(&mut session, stdin, &mut std::io::stdout()).await?
                }
            }
            session.close();
        }
        Commands::Serve { addr } => {
            drop(conn);
            server::run(&addr).await?;
        }
    }

    Ok(())
}

/**
 * \brief 交互对话：逐行读取输入直到 EOF 或 /quit；单轮失败只打印错误，不中断循环。
 * \details 输入按原样发送，不做裁剪。
 */
async fn interactive<R, W>(session: &mut ChatSession, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "Type your message... (/quit to exit)")?;
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("read input failed")? {
        if line.trim() == "/quit" {
            break;
        }
        writeln!(out, "User: {}", line)?;
        match session.send(&line).await {
            Ok(reply) => writeln!(out, "ChatGPT: {}", reply)?,
            Err(err) => {
                telemetry::log_error("cli.chat", &err.to_string());
                writeln!(out, "error: {}", err)?;
            }
        }
        out.flush()?;
    }
    Ok(())
}

fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count == 0 {
        return "(not set)".to_string();
    }
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = key.chars().skip(count - 4).collect();
    format!("****{}", tail)
}
