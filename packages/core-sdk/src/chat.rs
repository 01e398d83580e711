use std::fmt;

use crate::llm::{CompletionClient, CompletionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => f.write_str("User"),
            Speaker::Assistant => f.write_str("ChatGPT"),
        }
    }
}

/**
 * \brief 对话框中显示的一行。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.speaker, self.text)
    }
}

/**
 * \brief 聊天对话框逻辑，构造时注入补全客户端。
 * \details 记录只存在于当前会话可见区域，关闭即丢弃；每轮请求互相独立，不携带历史上下文。
 */
#[derive(Debug)]
pub struct ChatSession {
    client: CompletionClient,
    transcript: Vec<Turn>,
}

impl ChatSession {
    pub fn new(client: CompletionClient) -> Self {
        Self {
            client,
            transcript: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /**
     * \brief 发送一条输入：先追加用户行，成功后追加回复行。
     * \return 回复文本；失败时用户行保留，错误向上传递
     */
    pub async fn send(&mut self, input: &str) -> Result<String, CompletionError> {
        self.transcript.push(Turn {
            speaker: Speaker::User,
            text: input.to_string(),
        });
        let reply = self.client.complete(input).await?;
        self.transcript.push(Turn {
            speaker: Speaker::Assistant,
            text: reply.text.clone(),
        });
        Ok(reply.text)
    }

    /**
     * \brief 每轮一行的纯文本渲染。
     */
    pub fn render(&self) -> String {
        self.transcript
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn close(self) {}
}
