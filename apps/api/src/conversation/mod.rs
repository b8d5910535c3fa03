// Companion conversation: request models, context assembly, persistence
// collaborator, and the local fallback responder.

pub mod assembler;
pub mod fallback;
pub mod handlers;
pub mod models;
pub mod prompts;
pub mod store;
