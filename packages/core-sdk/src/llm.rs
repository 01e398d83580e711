use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{ChatRequest, ChatResponse, Message};
use crate::telemetry;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/**
 * \brief 补全调用的错误分类。
 * \details JSON 结构不符合预期不算错误，会退化为空回复；非 2xx 状态单独成类，不与空回复混淆。
 */
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request failed: {status} -> {body}")]
    Status { status: StatusCode, body: String },

    #[error("response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("api key contains characters not allowed in an HTTP header")]
    InvalidApiKey,
}

/**
 * \brief 预先配置好凭据的补全客户端，两次调用之间不保存任何状态。
 */
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl CompletionClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CompletionError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
        })
    }

    /**
     * \brief 替换请求地址（兼容网关或本地测试）。
     */
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /**
     * \brief 替换底层 HTTP 客户端（代理、TLS 等由调用方决定）。
     */
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub async fn complete_request(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatResponse, CompletionError> {
        self.complete(&request.prompt).await
    }

    /**
     * \brief 单次非流式调用：一次 POST，无重试、无超时。
     * \param prompt 用户输入，原样作为唯一一条 user 消息发送
     */
    pub async fn complete(&self, prompt: &str) -> Result<ChatResponse, CompletionError> {
        telemetry::log_event(
            "llm.complete",
            &format!(
                "host={} model={} prompt_len={}",
                endpoint_host(&self.endpoint),
                DEFAULT_MODEL,
                prompt.len()
            ),
        );

        let authorization = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| CompletionError::InvalidApiKey)?;

        let resp = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, authorization)
            .json(&build_request_body(prompt))
            .send()
            .await
            .inspect_err(|e| telemetry::log_error("llm.complete", &e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            telemetry::log_error("llm.complete", &format!("status={}", status));
            return Err(CompletionError::Status { status, body });
        }

        let text = resp.text().await?;
        let v: Value = serde_json::from_str(&text)?;
        Ok(ChatResponse {
            text: extract_reply(&v),
        })
    }
}

/**
 * \brief 构造请求体：固定模型、单条 user 消息、固定温度。
 */
pub fn build_request_body(prompt: &str) -> Value {
    json!({
        "model": DEFAULT_MODEL,
        "messages": [Message::user(prompt)],
        "temperature": DEFAULT_TEMPERATURE,
    })
}

/**
 * \brief 提取 `choices[0].message.content`，路径上任何一环缺失都返回空串。
 */
pub fn extract_reply(v: &Value) -> String {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

fn endpoint_host(endpoint: &str) -> String {
    reqwest::Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| "?".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Router};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct Recorded {
        authorization: Option<String>,
        content_type: Option<String>,
        body: Value,
    }

    type Seen = Arc<Mutex<Vec<Recorded>>>;

    async fn spawn_upstream(status: StatusCode, reply: &'static str) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, body: String| {
                let sink = sink.clone();
                async move {
                    let header = |name: reqwest::header::HeaderName| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(|s| s.to_string())
                    };
                    sink.lock().unwrap().push(Recorded {
                        authorization: header(AUTHORIZATION),
                        content_type: header(CONTENT_TYPE),
                        body: serde_json::from_str(&body).unwrap_or(Value::Null),
                    });
                    (status, reply)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind upstream");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (format!("http://{}/v1/chat/completions", addr), seen)
    }

    fn client(api_key: &str, endpoint: &str) -> CompletionClient {
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("build http client");
        CompletionClient::new(api_key)
            .expect("build client")
            .with_http_client(http)
            .with_endpoint(endpoint)
    }

    #[test]
    fn test_request_body_shape() {
        let body = build_request_body("hi there");
        assert_eq!(
            body,
            json!({
                "model": "gpt-3.5-turbo",
                "messages": [{"role": "user", "content": "hi there"}],
                "temperature": 0.7
            })
        );
    }

    #[test]
    fn test_extract_reply_tolerates_missing_path() {
        let ok = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_reply(&ok), "hello");
        assert_eq!(extract_reply(&json!({"choices": []})), "");
        assert_eq!(extract_reply(&json!({"choices": [{}]})), "");
        assert_eq!(extract_reply(&json!({"choices": [{"message": {}}]})), "");
        assert_eq!(
            extract_reply(&json!({"choices": [{"message": {"content": null}}]})),
            ""
        );
        assert_eq!(extract_reply(&json!({"error": {"message": "nope"}})), "");
    }

    #[test]
    fn test_default_endpoint() {
        let c = CompletionClient::new("k").expect("build client");
        assert_eq!(c.endpoint(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(c.api_key(), "k");
    }

    #[tokio::test]
    async fn test_complete_sends_single_post_and_extracts_reply() {
        let (url, seen) = spawn_upstream(
            StatusCode::OK,
            r#"{"id":"x","choices":[{"message":{"role":"assistant","content":"hello"}}]}"#,
        )
        .await;

        let reply = client("sk-test", &url)
            .complete("what is a note?")
            .await
            .expect("complete");
        assert_eq!(reply.text, "hello");

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer sk-test"));
        assert_eq!(seen[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(seen[0].body["messages"][0]["content"], "what is a note?");
        assert_eq!(seen[0].body["messages"][0]["role"], "user");
        assert_eq!(seen[0].body["model"], "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn test_complete_request_uses_prompt() {
        let (url, seen) =
            spawn_upstream(StatusCode::OK, r#"{"choices":[{"message":{"content":"ok"}}]}"#).await;
        let req = ChatRequest {
            prompt: "ping".to_string(),
        };
        let reply = client("k", &url).complete_request(&req).await.expect("complete");
        assert_eq!(reply.text, "ok");
        assert_eq!(seen.lock().unwrap()[0].body["messages"][0]["content"], "ping");
    }

    #[tokio::test]
    async fn test_empty_choices_yield_empty_reply() {
        let (url, _) = spawn_upstream(StatusCode::OK, r#"{"choices":[]}"#).await;
        let reply = client("k", &url).complete("x").await.expect("complete");
        assert_eq!(reply.text, "");

        let (url, _) = spawn_upstream(StatusCode::OK, r#"{"choices":[{}]}"#).await;
        let reply = client("k", &url).complete("x").await.expect("complete");
        assert_eq!(reply.text, "");
    }

    #[tokio::test]
    async fn test_empty_key_still_sends_bearer_header() {
        let (url, seen) = spawn_upstream(StatusCode::OK, r#"{"choices":[]}"#).await;
        client("", &url).complete("x").await.expect("complete");
        let auth = seen.lock().unwrap()[0].authorization.clone();
        assert_eq!(auth.as_deref().map(str::trim_end), Some("Bearer"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_distinct_error() {
        let (url, _) = spawn_upstream(
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"Incorrect API key provided"}}"#,
        )
        .await;
        let err = client("bad", &url).complete("x").await.unwrap_err();
        match err {
            CompletionError::Status { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert!(body.contains("Incorrect API key"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_decode_error() {
        let (url, _) = spawn_upstream(StatusCode::OK, "<html>gateway</html>").await;
        let err = client("k", &url).complete("x").await.unwrap_err();
        assert!(matches!(err, CompletionError::Decode(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let url = format!("http://{}/v1/chat/completions", addr);
        let err = client("k", &url).complete("x").await.unwrap_err();
        assert!(matches!(err, CompletionError::Network(_)));
    }

    #[tokio::test]
    async fn test_unsendable_key_is_rejected_before_request() {
        let (url, seen) = spawn_upstream(StatusCode::OK, r#"{"choices":[]}"#).await;
        let err = client("sk-abc\n", &url).complete("x").await.unwrap_err();
        assert!(matches!(err, CompletionError::InvalidApiKey));
        assert!(!err.to_string().contains("sk-abc"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_telemetry_logs_length_but_not_secrets() {
        let dir = std::env::temp_dir().join(format!("quillchat-logs-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::env::set_var("QUILLCHAT_LOG_DIR", &dir);
        let log_file = dir.join("quillchat.log");

        let (url, _) =
            spawn_upstream(StatusCode::OK, r#"{"choices":[{"message":{"content":"ok"}}]}"#).await;
        let c = client("sk-secret", &url);

        telemetry::set_enabled(false);
        c.complete("secret prompt").await.expect("complete while disabled");
        assert!(!log_file.exists());

        telemetry::set_enabled(true);
        let result = c.complete("secret prompt").await;
        telemetry::set_enabled(false);
        result.expect("complete while enabled");

        let log = std::fs::read_to_string(&log_file).expect("read log");
        assert!(log.contains("[INFO] llm.complete"));
        assert!(log.contains("prompt_len=13"));
        assert!(!log.contains("sk-secret"));
        assert!(!log.contains("secret prompt"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
