//! Context Window Management
//!
//! Bounds the history forwarded to the completion API to a fixed number of
//! user/assistant exchanges. The system prompt at the head is never dropped.

use crate::memory::store::ChatMessage;

/// Keep the leading system message plus at most the last `2 * max_exchanges`
/// entries, preserving order.
pub fn trim_history(messages: &[ChatMessage], max_exchanges: usize) -> Vec<ChatMessage> {
    let Some((system_msg, convo)) = messages.split_first() else {
        return Vec::new();
    };

    let keep = max_exchanges.saturating_mul(2);
    let start = convo.len().saturating_sub(keep);

    let mut trimmed = Vec::with_capacity(1 + convo.len() - start);
    trimmed.push(system_msg.clone());
    trimmed.extend_from_slice(&convo[start..]);
    trimmed
}
