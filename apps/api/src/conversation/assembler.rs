//! Builds the message sequence sent to the model.
//!
//! Pure function of persisted history (newest first) and the caller's
//! submitted messages. System prompts are never carried through history;
//! the caller adds its own.

use crate::config::{CONTENT_CAP_CHARS, HISTORY_WINDOW};
use crate::conversation::models::{ChatMessage, Role};

pub const ELLIPSIS: &str = "…";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerLimits {
    pub content_cap_chars: usize,
    pub history_window: usize,
}

impl Default for AssemblerLimits {
    fn default() -> Self {
        Self {
            content_cap_chars: CONTENT_CAP_CHARS,
            history_window: HISTORY_WINDOW,
        }
    }
}

/// Merges history and incoming messages into one chronological sequence.
///
/// Steps, in order: chronological merge, role filter (user/assistant only),
/// trim + drop blanks, content cap, collapse exact consecutive duplicates,
/// keep the newest `history_window` messages.
pub fn build(
    persisted_newest_first: &[ChatMessage],
    incoming: &[ChatMessage],
    limits: AssemblerLimits,
) -> Vec<ChatMessage> {
    let candidates = persisted_newest_first.iter().rev().chain(incoming.iter());

    let mut assembled: Vec<ChatMessage> = Vec::new();
    for message in candidates {
        if !matches!(message.role, Role::User | Role::Assistant) {
            continue;
        }

        let trimmed = message.content.trim();
        if trimmed.is_empty() {
            continue;
        }

        let content = cap_content(trimmed, limits.content_cap_chars);

        // Clients that resend the whole transcript every turn repeat what is
        // already persisted.
        if assembled
            .last()
            .is_some_and(|prev| prev.role == message.role && prev.content == content)
        {
            continue;
        }

        assembled.push(ChatMessage {
            role: message.role,
            content,
            timestamp: message.timestamp,
        });
    }

    if assembled.len() > limits.history_window {
        assembled.drain(..assembled.len() - limits.history_window);
    }
    assembled
}

/// Truncates to `cap` characters, appending an ellipsis when anything was cut.
pub fn cap_content(content: &str, cap: usize) -> String {
    match content.char_indices().nth(cap) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &content[..cut]),
        None => content.to_string(),
    }
}
