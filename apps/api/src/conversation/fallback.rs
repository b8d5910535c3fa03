//! Deterministic local replies used when no model is configured, the model
//! fails, or the model misses its deadline.

use crate::conversation::models::{ChatMessage, Role};
use crate::llm_client::ModelReply;

/// Picks a canned reply from the most recent user message.
pub fn local_reply(context: &[ChatMessage]) -> ModelReply {
    let last_user = context
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.trim())
        .unwrap_or("");
    let lower = last_user.to_lowercase();

    if last_user.is_empty() {
        return reply(
            "Hello! Tell me what's on your mind and I'll help you break it down.",
            &["Log mood", "Plan day"],
        );
    }
    if lower.contains("resume") || lower.contains("cv") {
        return reply(
            "I can help with your resume: paste a bullet and I'll suggest improvements (quantify impact, add keywords).",
            &["Optimize bullet", "Add metrics"],
        );
    }
    if lower.contains("interview") || lower.contains("practice") {
        return reply(
            "Let's run a quick mock interview. Tell me the role and I'll ask a question.",
            &["Start mock interview"],
        );
    }
    if lower.contains("anxious") || lower.contains("anxiety") {
        return reply(
            "You sound anxious. Try a 2-minute grounding: breathe in for 4s, hold for 4s, out for 6s. Want me to guide you?",
            &["Guide breathing"],
        );
    }

    reply(
        "Thanks. Here's a short plan:\n\n\
         1) Break tasks into 15-minute blocks.\n\
         2) Take a 2-minute breathing break.\n\
         3) Choose one next action and start it.\n\n\
         Which would you like to try?",
        &["Break into blocks", "Do breathing", "Start step"],
    )
}

fn reply(text: &str, actions: &[&str]) -> ModelReply {
    ModelReply {
        text: text.to_string(),
        suggested_actions: actions.iter().map(|a| a.to_string()).collect(),
    }
}
