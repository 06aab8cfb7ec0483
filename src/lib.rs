//! Dilemma Chat Backend
//!
//! An HTTP backend that relays participant messages to an OpenAI-compatible
//! chat completions API while it:
//! - Keeps short-lived per-conversation history in memory
//! - Resets a conversation after 15 minutes of inactivity
//! - Forwards only the system prompt plus the last ten exchanges
//! - Appends every exchange to a CSV log
//!
//! FLOW:
//! REQUEST → SESSION → TRIM → COMPLETE → RECORD → LOG

pub mod api;
pub mod chatlog;
pub mod config;
pub mod conversational;
pub mod error;
pub mod memory;
pub mod models;
pub mod openai;
pub mod state;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use config::{ChatConfig, Variant};
