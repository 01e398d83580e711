use serde::{Deserialize, Serialize};

/**
 * \brief 插件设置记录，序列化字段名与宿主存储中的 JSON 保持一致（camelCase）。
 * \details 反序列化时缺失字段回落到默认值，未知字段被忽略。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /** \brief 保留的通用设置项，默认 "default"。 */
    pub my_setting: String,
    /** \brief 补全接口的 API Key（明文，不做格式校验） */
    pub api_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            my_setting: "default".to_string(),
            api_key: String::new(),
        }
    }
}

/**
 * \brief 单次用户提交。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

/**
 * \brief 从 Provider 返回的 JSON 中提取出的回复文本。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}
