//! Chat exchange log
//!
//! Every exchange is appended as one CSV row. The header is written only when
//! the file is missing or empty. Rows are never rewritten.

use chrono::Local;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::Variant;
use crate::error::ChatError;
use crate::Result;

/// One exchange as it is logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: String,
    pub model: String,
    pub participant_id: String,
    pub response_id: String,
    pub scenario: String,
    pub system_prompt: String,
    pub user_input: String,
    pub bot_reply: String,
}

impl LogRecord {
    /// Local wall-clock time, ISO-8601 without offset
    pub fn local_timestamp() -> String {
        Local::now()
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogColumn {
    Timestamp,
    Model,
    ParticipantId,
    ResponseId,
    Scenario,
    SystemPrompt,
    UserInput,
    BotReply,
}

impl LogColumn {
    fn header(self, scenario_label: &'static str) -> &'static str {
        match self {
            LogColumn::Timestamp => "timestamp",
            LogColumn::Model => "model",
            LogColumn::ParticipantId => "participant_id",
            LogColumn::ResponseId => "response_id",
            LogColumn::Scenario => scenario_label,
            LogColumn::SystemPrompt => "system_prompt",
            LogColumn::UserInput => "user_input",
            LogColumn::BotReply => "bot_reply",
        }
    }

    fn value(self, record: &LogRecord) -> &str {
        match self {
            LogColumn::Timestamp => &record.timestamp,
            LogColumn::Model => &record.model,
            LogColumn::ParticipantId => &record.participant_id,
            LogColumn::ResponseId => &record.response_id,
            LogColumn::Scenario => &record.scenario,
            LogColumn::SystemPrompt => &record.system_prompt,
            LogColumn::UserInput => &record.user_input,
            LogColumn::BotReply => &record.bot_reply,
        }
    }
}

/// Fixed column list for each variant
pub fn columns_for(variant: Variant) -> &'static [LogColumn] {
    use LogColumn::*;

    match variant {
        Variant::Reflect => &[
            Timestamp,
            Model,
            ParticipantId,
            ResponseId,
            Scenario,
            UserInput,
            BotReply,
        ],
        Variant::Resolve => &[
            Timestamp,
            Model,
            ResponseId,
            Scenario,
            SystemPrompt,
            UserInput,
            BotReply,
        ],
        Variant::Stimuli => &[
            Timestamp,
            Model,
            ParticipantId,
            ResponseId,
            Scenario,
            SystemPrompt,
            UserInput,
            BotReply,
        ],
    }
}

/// Append-only CSV log of exchanges
pub struct ChatLog {
    path: PathBuf,
    columns: &'static [LogColumn],
    scenario_label: &'static str,
    // Serializes appends from concurrent requests
    write_lock: Mutex<()>,
}

impl ChatLog {
    pub fn new(path: impl Into<PathBuf>, variant: Variant) -> Self {
        Self {
            path: path.into(),
            columns: columns_for(variant),
            scenario_label: variant.scenario_label(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .map(|c| c.header(self.scenario_label))
            .collect()
    }

    /// Append one record, writing the header first if the file has none
    pub async fn append(&self, record: &LogRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let needs_header = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if needs_header {
            writer.write_record(self.header())?;
        }
        writer.write_record(self.columns.iter().map(|c| c.value(record)))?;
        let bytes = writer
            .into_inner()
            .map_err(|e| ChatError::IoError(e.into_error()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        Ok(())
    }
}
