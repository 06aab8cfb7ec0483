//! Wire models for the chat endpoint

use serde::{Deserialize, Serialize};

pub const DEFAULT_RESPONSE_ID: &str = "none";
pub const DEFAULT_PARTICIPANT_ID: &str = "anonymous";
pub const DEFAULT_SCENARIO: &str = "unknown";

/// Body of `POST /chat`
///
/// Every field is optional on the wire; missing values fall back to the
/// defaults above. The scenario text arrives as `dilemma` or `stimuli`
/// depending on which front end sent it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub participant_id: Option<String>,
    #[serde(default, alias = "stimuli")]
    pub dilemma: Option<String>,
}

impl ChatRequest {
    pub fn message(&self) -> &str {
        self.message.as_deref().map(str::trim).unwrap_or_default()
    }

    pub fn response_id(&self) -> &str {
        self.response_id.as_deref().unwrap_or(DEFAULT_RESPONSE_ID)
    }

    pub fn participant_id(&self) -> &str {
        self.participant_id
            .as_deref()
            .unwrap_or(DEFAULT_PARTICIPANT_ID)
    }

    pub fn scenario(&self) -> &str {
        self.dilemma.as_deref().unwrap_or(DEFAULT_SCENARIO)
    }
}

/// Body returned by `POST /chat`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponse {
    pub response: String,
}
