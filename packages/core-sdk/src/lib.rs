pub mod chat;
pub mod db;
pub mod llm;
pub mod models;
pub mod server;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::chat::{ChatSession, Speaker, Turn};
    pub use crate::db;
    pub use crate::llm::{self, CompletionClient, CompletionError};
    pub use crate::models::{ChatRequest, ChatResponse, Settings};
    pub use crate::server;
    pub use crate::telemetry;
}
