//! Chat exchange handling
//!
//! One call per incoming message:
//! lookup/create session → append user turn → trim → completion call →
//! record reply → append to chat log.
//!
//! Upstream failures never fail the request. The caller gets an error string
//! as the reply, and only the user turn is kept in history.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::chatlog::{ChatLog, LogRecord};
use crate::config::{ChatConfig, KeyScope, Variant};
use crate::memory::SessionKey;
use crate::models::ChatRequest;
use crate::openai::{CompletionClient, OpenAiClient};
use crate::state::{InMemorySessionStore, SessionStore};

/// Message the front end sends to open a conversation
pub const START_COMMAND: &str = "START_CONVERSATION";

/// Replace the start command with an opening question about the scenario
pub fn expand_start_command(user_input: &str, scenario: &str) -> String {
    if user_input.eq_ignore_ascii_case(START_COMMAND) {
        format!("Help me decide what I should do. {}", scenario)
    } else {
        user_input.to_string()
    }
}

pub struct ChatService {
    store: Arc<dyn SessionStore>,
    client: Arc<dyn CompletionClient>,
    chat_log: ChatLog,
    variant: Variant,
    max_exchanges: usize,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        client: Arc<dyn CompletionClient>,
        chat_log: ChatLog,
        variant: Variant,
        max_exchanges: usize,
    ) -> Self {
        Self {
            store,
            client,
            chat_log,
            variant,
            max_exchanges,
        }
    }

    /// Wire up the in-memory store, OpenAI client and CSV log from config
    pub fn from_config(config: &ChatConfig) -> crate::Result<Self> {
        let store = InMemorySessionStore::new(config.variant.system_prompt(), config.session_timeout);
        let client = OpenAiClient::from_config(config)?;
        if !client.has_api_key() {
            warn!("OPENAI_API_KEY is not set; every chat reply will be an error message");
        }
        let chat_log = ChatLog::new(config.log_path.clone(), config.variant);

        Ok(Self::new(
            Arc::new(store),
            Arc::new(client),
            chat_log,
            config.variant,
            config.max_exchanges,
        ))
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn session_key(&self, req: &ChatRequest) -> SessionKey {
        match self.variant.key_scope() {
            KeyScope::ParticipantAndResponse => {
                SessionKey::participant_response(req.participant_id(), req.response_id())
            }
            KeyScope::ResponseOnly => SessionKey::response(req.response_id()),
        }
    }

    pub async fn handle_chat(&self, req: &ChatRequest) -> String {
        self.handle_chat_at(req, Utc::now()).await
    }

    /// Handle a message as if it arrived at `now`
    ///
    /// `now` is the arrival time. A request queued behind another exchange
    /// for the same key still records its arrival as last activity; the
    /// per-key lock is FIFO, so last activity never moves backwards.
    pub async fn handle_chat_at(&self, req: &ChatRequest, now: DateTime<Utc>) -> String {
        let response_id = req.response_id();
        let participant_id = req.participant_id();
        let scenario = req.scenario();

        info!(
            response_id,
            participant_id,
            "{}: {} ({}: {})",
            response_id,
            req.message(),
            self.variant.scenario_label(),
            scenario
        );

        let key = self.session_key(req);
        let mut session = self.store.get_or_create_session(&key, now).await;

        let user_input = expand_start_command(req.message(), scenario);
        let outbound = session.outbound_messages(&user_input, self.max_exchanges);

        let (bot_reply, succeeded) = match self.client.complete(&outbound).await {
            Ok(reply) => (reply, true),
            Err(e) => {
                warn!(key = %key, "Completion call failed: {}", e);
                (format!("Error generating response: {}", e), false)
            }
        };

        session.record_exchange(&user_input, succeeded.then_some(bot_reply.as_str()), now);
        session.trim(self.max_exchanges);

        let system_prompt = session.system_prompt().to_string();
        let session_id = session.session_id;
        drop(session);

        let record = LogRecord {
            timestamp: LogRecord::local_timestamp(),
            model: self.client.model().to_string(),
            participant_id: participant_id.to_string(),
            response_id: response_id.to_string(),
            scenario: scenario.to_string(),
            system_prompt,
            user_input,
            bot_reply: bot_reply.clone(),
        };

        if let Err(error) = self.chat_log.append(&record).await {
            warn!(
                session_id = %session_id,
                path = %self.chat_log.path().display(),
                "Chat log write failed, reply will still be returned: {}",
                error
            );
        }

        bot_reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::memory::{ChatMessage, MessageRole};
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Completion client that replays scripted results and records its input
    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<crate::Result<String>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        fn with(replies: Vec<crate::Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::default(),
            }
        }

        fn last_call(&self) -> Vec<ChatMessage> {
            self.calls.lock().unwrap().last().cloned().unwrap_or_default()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, messages: &[ChatMessage]) -> crate::Result<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("What feels right to you?".to_string()))
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    struct Harness {
        service: ChatService,
        client: Arc<ScriptedClient>,
        dir: TempDir,
    }

    impl Harness {
        fn new(variant: Variant, client: ScriptedClient) -> Self {
            let dir = TempDir::new().unwrap();
            let client = Arc::new(client);
            let store = InMemorySessionStore::new(variant.system_prompt(), Duration::from_secs(900));
            let service = ChatService::new(
                Arc::new(store),
                client.clone(),
                ChatLog::new(dir.path().join("chatlog.csv"), variant),
                variant,
                10,
            );
            Self { service, client, dir }
        }

        fn log_rows(&self) -> Vec<Vec<String>> {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .from_path(self.dir.path().join("chatlog.csv"))
                .unwrap();
            reader
                .records()
                .map(|r| r.unwrap().iter().map(str::to_string).collect())
                .collect()
        }

        async fn history(&self, req: &ChatRequest, now: DateTime<Utc>) -> Vec<ChatMessage> {
            let key = self.service.session_key(req);
            let session = self.service.store().get_or_create_session(&key, now).await;
            session.messages().to_vec()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: Some(message.to_string()),
            response_id: Some("R_42".to_string()),
            participant_id: Some("P_7".to_string()),
            dilemma: Some("Your friend cheated on an exam.".to_string()),
        }
    }

    #[test]
    fn test_expand_start_command() {
        assert_eq!(
            expand_start_command("start_conversation", "A lost wallet."),
            "Help me decide what I should do. A lost wallet."
        );
        assert_eq!(
            expand_start_command("START_CONVERSATION", "x"),
            "Help me decide what I should do. x"
        );
        assert_eq!(expand_start_command("hello", "x"), "hello");
    }

    #[tokio::test]
    async fn test_first_exchange() {
        let harness = Harness::new(Variant::Reflect, ScriptedClient::default());
        let req = request("I am not sure what to do.");

        let reply = harness.service.handle_chat_at(&req, t0()).await;

        assert_eq!(reply, "What feels right to you?");

        let sent = harness.client.last_call();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, MessageRole::System);
        assert_eq!(sent[0].content, Variant::Reflect.system_prompt());
        assert_eq!(sent[1], ChatMessage::user("I am not sure what to do."));

        let history = harness.history(&req, t0()).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[2], ChatMessage::assistant("What feels right to you?"));

        let rows = harness.log_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[1][1..],
            [
                "test-model",
                "P_7",
                "R_42",
                "Your friend cheated on an exam.",
                "I am not sure what to do.",
                "What feels right to you?",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_call_keeps_only_user_turn() {
        let client = ScriptedClient::with(vec![Err(ChatError::Upstream(
            "HTTP 500: boom".to_string(),
        ))]);
        let harness = Harness::new(Variant::Reflect, client);
        let req = request("hello?");

        let reply = harness.service.handle_chat_at(&req, t0()).await;

        assert!(reply.contains("Error"));
        assert!(reply.contains("boom"));

        let history = harness.history(&req, t0()).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], ChatMessage::user("hello?"));
        assert!(history.iter().all(|m| m.role != MessageRole::Assistant));

        let rows = harness.log_rows();
        assert_eq!(rows[1][6], reply);
    }

    #[tokio::test]
    async fn test_one_sided_turn_is_forwarded_next_time() {
        let client = ScriptedClient::with(vec![Err(ChatError::MissingApiKey)]);
        let harness = Harness::new(Variant::Reflect, client);

        harness.service.handle_chat_at(&request("first"), t0()).await;
        harness.service.handle_chat_at(&request("second"), t0()).await;

        let sent = harness.client.last_call();
        let roles: Vec<MessageRole> = sent.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::User, MessageRole::User]
        );
    }

    #[tokio::test]
    async fn test_start_command_is_rewritten_and_logged() {
        let harness = Harness::new(Variant::Reflect, ScriptedClient::default());

        harness
            .service
            .handle_chat_at(&request("Start_Conversation"), t0())
            .await;

        let expected = "Help me decide what I should do. Your friend cheated on an exam.";
        assert_eq!(harness.client.last_call()[1], ChatMessage::user(expected));
        assert_eq!(harness.log_rows()[1][5], expected);
    }

    #[tokio::test]
    async fn test_long_conversation_is_trimmed() {
        let harness = Harness::new(Variant::Reflect, ScriptedClient::default());

        for i in 0..25 {
            harness
                .service
                .handle_chat_at(&request(&format!("turn {}", i)), t0())
                .await;
        }

        let sent = harness.client.last_call();
        assert_eq!(sent.len(), 21);
        assert_eq!(sent[0].role, MessageRole::System);
        assert_eq!(sent[20], ChatMessage::user("turn 24"));

        let history = harness.history(&request("x"), t0()).await;
        assert_eq!(history.len(), 21);
        assert_eq!(history[0].role, MessageRole::System);
        assert_eq!(harness.client.call_count(), 25);
    }

    #[tokio::test]
    async fn test_idle_session_starts_over() {
        let harness = Harness::new(Variant::Reflect, ScriptedClient::default());

        harness.service.handle_chat_at(&request("before"), t0()).await;
        let later = t0() + chrono::Duration::seconds(901);
        harness.service.handle_chat_at(&request("after"), later).await;

        let sent = harness.client.last_call();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], ChatMessage::user("after"));
    }

    #[tokio::test]
    async fn test_session_within_timeout_continues() {
        let harness = Harness::new(Variant::Reflect, ScriptedClient::default());

        harness.service.handle_chat_at(&request("before"), t0()).await;
        let later = t0() + chrono::Duration::seconds(900);
        harness.service.handle_chat_at(&request("after"), later).await;

        assert_eq!(harness.client.last_call().len(), 4);
    }

    #[tokio::test]
    async fn test_key_scope_follows_variant() {
        let mut other = request("hi");
        other.participant_id = Some("P_8".to_string());

        let reflect = Harness::new(Variant::Reflect, ScriptedClient::default());
        reflect.service.handle_chat_at(&request("hi"), t0()).await;
        reflect.service.handle_chat_at(&other, t0()).await;
        assert_eq!(reflect.client.last_call().len(), 2);
        assert_eq!(reflect.service.store().session_count().await, 2);

        let resolve = Harness::new(Variant::Resolve, ScriptedClient::default());
        resolve.service.handle_chat_at(&request("hi"), t0()).await;
        resolve.service.handle_chat_at(&other, t0()).await;
        assert_eq!(resolve.client.last_call().len(), 4);
        assert_eq!(resolve.service.store().session_count().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_logs_system_prompt() {
        let harness = Harness::new(Variant::Resolve, ScriptedClient::default());

        harness.service.handle_chat_at(&request("hi"), t0()).await;

        let rows = harness.log_rows();
        assert_eq!(rows[0][4], "system_prompt");
        assert_eq!(rows[1][4], Variant::Resolve.system_prompt());
    }

    #[tokio::test]
    async fn test_missing_api_key_reply() {
        let dir = TempDir::new().unwrap();
        let mut config = ChatConfig::for_variant(Variant::Reflect);
        config.log_path = dir.path().join("chatlog.csv");
        let service = ChatService::from_config(&config).unwrap();

        let reply = service.handle_chat_at(&request("hi"), t0()).await;

        assert!(reply.starts_with("Error generating response"));
        assert!(reply.contains("OPENAI_API_KEY"));
    }

    /// Blocks its first call until released
    #[derive(Default)]
    struct GatedClient {
        first_call: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl CompletionClient for GatedClient {
        async fn complete(&self, messages: &[ChatMessage]) -> crate::Result<String> {
            if !self.first_call.swap(true, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(format!("reply to {}", messages.len()))
        }

        fn model(&self) -> &str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_queued_request_records_arrival_time() {
        let dir = TempDir::new().unwrap();
        let variant = Variant::Reflect;
        let client = Arc::new(GatedClient::default());
        let service = Arc::new(ChatService::new(
            Arc::new(InMemorySessionStore::new("p", Duration::from_secs(900))),
            client.clone(),
            ChatLog::new(dir.path().join("chatlog.csv"), variant),
            variant,
            10,
        ));

        let slow = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.handle_chat_at(&request("first"), t0()).await })
        };
        client.entered.notified().await;

        let arrived = t0() + chrono::Duration::seconds(10);
        let queued = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.handle_chat_at(&request("second"), arrived).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queued.is_finished());

        client.release.notify_one();
        assert_eq!(slow.await.unwrap(), "reply to 2");
        assert_eq!(queued.await.unwrap(), "reply to 4");

        let key = service.session_key(&request("x"));
        let session = service.store().get_or_create_session(&key, arrived).await;
        assert_eq!(session.last_active(), arrived);
        assert_eq!(session.message_count(), 5);
    }

    #[tokio::test]
    async fn test_log_failure_still_returns_reply() {
        let dir = TempDir::new().unwrap();
        let variant = Variant::Reflect;
        let service = ChatService::new(
            Arc::new(InMemorySessionStore::new("p", Duration::from_secs(900))),
            Arc::new(ScriptedClient::default()),
            // A directory cannot be opened for appending
            ChatLog::new(dir.path(), variant),
            variant,
            10,
        );

        let reply = service.handle_chat_at(&request("hi"), t0()).await;
        assert_eq!(reply, "What feels right to you?");
    }
}
