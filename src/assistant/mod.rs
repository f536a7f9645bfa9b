//! Conversational assistant with a persisted, self-summarizing history.
//!
//! Components:
//! - `turn`: role-tagged messages
//! - `store`: in-memory history and its `.her` personality file
//! - `summarizer`: exchange counter and summary prompts
//! - `chat_client`: OpenAI-compatible chat completion backend
//! - `agent`: ties the above together behind `send_message`

pub mod agent;
pub mod chat_client;
pub mod store;
pub mod summarizer;
pub mod turn;

pub use agent::ConversationAgent;
pub use chat_client::{ChatBackend, OpenAiChatClient};
