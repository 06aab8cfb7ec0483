//! Runtime configuration
//!
//! Everything is read from the process environment (after `.env` is loaded by
//! the binary). The variant profile selects which of the three deployments
//! this process behaves as.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ChatError;
use crate::Result;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 15 * 60;
pub const DEFAULT_MAX_EXCHANGES: usize = 10;

const REFLECT_PROMPT: &str = "You are a nonjudgmental assistant helping the user reflect on this moral dilemma. \
Keep replies short (3–5 sentences), and end with a gentle reflective question.";

const RESOLVE_PROMPT: &str = "You are a nonjudgmental assistant helping the user resolve a dilemma. \
Keep replies short (3–5 sentences), plain language (~8th-grade). Ask clarifying questions if needed.";

const STIMULI_PROMPT: &str = "You are a nonjudgmental assistant helping the user think through the situation they were shown. \
Keep replies short (3–5 sentences), plain language, and end with a gentle reflective question.";

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    /// Sessions keyed by participant and response, scenario sent as `dilemma`
    #[default]
    Reflect,
    /// Sessions keyed by response only, system prompt logged, uncached UI
    Resolve,
    /// Like `Reflect`, but the scenario is labelled `stimuli`
    Stimuli,
}

/// Which identifiers make up the session key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    ParticipantAndResponse,
    ResponseOnly,
}

impl Variant {
    pub fn system_prompt(self) -> &'static str {
        match self {
            Variant::Reflect => REFLECT_PROMPT,
            Variant::Resolve => RESOLVE_PROMPT,
            Variant::Stimuli => STIMULI_PROMPT,
        }
    }

    pub fn key_scope(self) -> KeyScope {
        match self {
            Variant::Resolve => KeyScope::ResponseOnly,
            Variant::Reflect | Variant::Stimuli => KeyScope::ParticipantAndResponse,
        }
    }

    /// Column name used for the scenario text in the chat log
    pub fn scenario_label(self) -> &'static str {
        match self {
            Variant::Stimuli => "stimuli",
            Variant::Reflect | Variant::Resolve => "dilemma",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Variant::Reflect => 80,
            Variant::Resolve | Variant::Stimuli => 5000,
        }
    }

    /// Whether `GET /` should tell browsers not to cache the page
    pub fn no_cache_page(self) -> bool {
        matches!(self, Variant::Resolve)
    }
}

impl FromStr for Variant {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "reflect" => Ok(Variant::Reflect),
            "resolve" => Ok(Variant::Resolve),
            "stimuli" => Ok(Variant::Stimuli),
            other => Err(ChatError::Config(format!(
                "unknown CHAT_VARIANT '{}' (expected reflect, resolve or stimuli)",
                other
            ))),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Variant::Reflect => "reflect",
            Variant::Resolve => "resolve",
            Variant::Stimuli => "stimuli",
        };
        f.write_str(name)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub variant: Variant,
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    pub request_timeout: Duration,
    pub port: u16,
    pub log_path: PathBuf,
    pub page_path: PathBuf,
    pub session_timeout: Duration,
    pub max_exchanges: usize,
}

impl ChatConfig {
    /// Defaults for a variant, without touching the environment
    pub fn for_variant(variant: Variant) -> Self {
        Self {
            variant,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(60),
            port: variant.default_port(),
            log_path: PathBuf::from("chatlog.csv"),
            page_path: PathBuf::from("chat.html"),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            max_exchanges: DEFAULT_MAX_EXCHANGES,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source
    ///
    /// Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let variant = match var("CHAT_VARIANT") {
            Some(value) => value.parse()?,
            None => Variant::default(),
        };

        let mut config = Self::for_variant(variant);

        config.api_key = var("OPENAI_API_KEY");
        if let Some(model) = var("OPENAI_MODEL") {
            config.model = model;
        }
        if let Some(base) = var("OPENAI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse_value::<u64>("OPENAI_TIMEOUT_SECS", var("OPENAI_TIMEOUT_SECS"))? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(port) = parse_value::<u16>("PORT", var("PORT"))? {
            config.port = port;
        }
        if let Some(path) = var("CHAT_LOG_PATH") {
            config.log_path = PathBuf::from(path);
        }
        if let Some(path) = var("CHAT_PAGE_PATH") {
            config.page_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_value::<u64>("SESSION_TIMEOUT_SECS", var("SESSION_TIMEOUT_SECS"))? {
            config.session_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = parse_value::<usize>("MAX_EXCHANGES", var("MAX_EXCHANGES"))? {
            config.max_exchanges = max;
        }

        Ok(config)
    }
}

fn parse_value<T: FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ChatError::Config(format!("invalid {} '{}': {}", name, raw, e))),
        None => Ok(None),
    }
}
