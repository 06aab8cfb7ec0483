//! Conversation memory
//!
//! Session state and the history window applied before each completion call.

pub mod context_manager;
pub mod store;

pub use context_manager::trim_history;
pub use store::{ChatMessage, MessageRole, Session, SessionKey};
