//! Request mediator: composition root for the companion endpoint.
//!
//! Per request: resolve identity, rate check, assemble context, call the
//! model under a deadline, then reply with the session cookie when the
//! identity was minted on this request. A rejected request still carries
//! that cookie so the client keeps one identity across retries.
//!
//! Storage outages never break the conversation: they are logged and the
//! flow continues without history. A rejected query is a bug and is raised.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{
    EndpointLimit, HISTORY_FETCH_LIMIT, MAX_BUCKETS, MAX_INCOMING_MESSAGES, MODEL_DEADLINE,
    STORE_TIMEOUT,
};
use crate::conversation::assembler::{self, cap_content, AssemblerLimits};
use crate::conversation::fallback::local_reply;
use crate::conversation::models::{ChatMessage, ChatRequest, CompanionReply, ReplySource, Role};
use crate::conversation::prompts::COMPANION_SYSTEM;
use crate::conversation::store::{MessageStore, StoreError};
use crate::errors::AppError;
use crate::llm_client::{ChatModel, ModelReply};
use crate::models::user::UserProfile;
use crate::rate_limit::caller::{bucket_key, caller_identifier};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::session::cookie::session_cookie;
use crate::session::token::TokenCodec;
use crate::session::{new_guest_id, resolve_or_mint, session_user_id, ResolvedIdentity};

pub const CHAT_ENDPOINT: &str = "api:companion-chat";

#[derive(Debug, Clone)]
pub struct MediatorSettings {
    pub secure_cookies: bool,
    pub chat_limit: EndpointLimit,
    pub assembler: AssemblerLimits,
    pub history_fetch_limit: i64,
    pub max_incoming_messages: usize,
    pub model_deadline: Duration,
    pub store_timeout: Duration,
}

impl MediatorSettings {
    pub fn new(secure_cookies: bool, chat_limit: EndpointLimit) -> Self {
        Self {
            secure_cookies,
            chat_limit,
            assembler: AssemblerLimits::default(),
            history_fetch_limit: HISTORY_FETCH_LIMIT,
            max_incoming_messages: MAX_INCOMING_MESSAGES,
            model_deadline: MODEL_DEADLINE,
            store_timeout: STORE_TIMEOUT,
        }
    }
}

/// Outcome of one chat request plus the cookie to attach, if any.
/// The cookie is set whenever an identity was minted, even on rejection.
#[derive(Debug)]
pub struct MediatedReply {
    pub result: Result<CompanionReply, AppError>,
    pub set_cookie: Option<String>,
}

/// A freshly signed session for a logged-in user.
#[derive(Debug)]
pub struct SignedIn {
    pub user: UserProfile,
    pub set_cookie: String,
}

pub struct RequestMediator {
    codec: TokenCodec,
    limiter: RateLimiter,
    store: Arc<dyn MessageStore>,
    model: Option<Arc<dyn ChatModel>>,
    settings: MediatorSettings,
}

impl RequestMediator {
    pub fn new(
        codec: TokenCodec,
        store: Arc<dyn MessageStore>,
        model: Option<Arc<dyn ChatModel>>,
        settings: MediatorSettings,
    ) -> Self {
        Self {
            codec,
            limiter: RateLimiter::new(MAX_BUCKETS),
            store,
            model,
            settings,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn model_backend(&self) -> Option<&'static str> {
        self.model.as_ref().map(|m| m.backend())
    }

    /// Full pipeline for `POST /api/companion/chat`.
    pub async fn handle_chat(&self, headers: &HeaderMap, body: &[u8]) -> MediatedReply {
        let identity = self.resolve_identity(headers);
        if identity.is_new() {
            debug!(user_id = %identity.user_id, "Minted guest session");
        }

        let result = self.chat_turn(&identity.user_id, headers, body).await;

        MediatedReply {
            result,
            set_cookie: identity.set_cookie,
        }
    }

    async fn chat_turn(
        &self,
        user_id: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<CompanionReply, AppError> {
        self.admit(CHAT_ENDPOINT, self.settings.chat_limit, headers)?;

        let request = ChatRequest::from_json(body, self.settings.max_incoming_messages)?;

        self.converse(user_id, request.messages).await
    }

    /// `POST /api/auth/login`: upserts the user by email (or creates a guest)
    /// and signs a session for it. Without a reachable store the user is
    /// transient.
    pub async fn login(
        &self,
        email: Option<String>,
        name: Option<String>,
    ) -> Result<SignedIn, AppError> {
        let stored = self
            .store_call(
                "upsert user",
                self.store.upsert_user(email.as_deref(), name.as_deref()),
            )
            .await?;

        let user = stored.unwrap_or_else(|| UserProfile {
            id: new_guest_id(),
            email,
            name,
        });

        let issued = self.codec.issue(&user.id);
        info!(user_id = %user.id, "Session issued");

        Ok(SignedIn {
            set_cookie: session_cookie(
                &issued.token,
                issued.max_age_secs,
                self.settings.secure_cookies,
            ),
            user,
        })
    }

    /// `GET /api/auth/me`: the profile behind a valid session. A session whose
    /// user row is gone yields `None`; with no reachable store the caller is
    /// reported as a guest.
    pub async fn current_user(&self, headers: &HeaderMap) -> Result<Option<UserProfile>, AppError> {
        let Some(user_id) = session_user_id(&self.codec, headers) else {
            return Ok(None);
        };

        let stored = self
            .store_call("find user", self.store.find_user(&user_id))
            .await?;

        match stored {
            Some(found) => Ok(found),
            None => Ok(Some(UserProfile::guest(user_id))),
        }
    }

    pub fn resolve_identity(&self, headers: &HeaderMap) -> ResolvedIdentity {
        resolve_or_mint(&self.codec, headers, self.settings.secure_cookies)
    }

    /// Counts the request against `endpoint` for the calling address.
    pub fn admit(
        &self,
        endpoint: &str,
        limit: EndpointLimit,
        headers: &HeaderMap,
    ) -> Result<RateDecision, AppError> {
        let caller = caller_identifier(headers);
        let decision = self.limiter.check(&bucket_key(endpoint, &caller), limit);

        if !decision.admitted {
            let retry_after_secs = decision.retry_after_secs(Utc::now().timestamp_millis());
            warn!(
                endpoint,
                caller = %caller,
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::RateLimited { retry_after_secs });
        }

        Ok(decision)
    }

    /// Assembles context for `user_id`, calls the model and persists the turn.
    pub async fn converse(
        &self,
        user_id: &str,
        incoming: Vec<ChatMessage>,
    ) -> Result<CompanionReply, AppError> {
        self.record_user(user_id);

        let history = self
            .store_call(
                "fetch history",
                self.store
                    .recent_messages(user_id, self.settings.history_fetch_limit),
            )
            .await?
            .unwrap_or_default();

        let context = assembler::build(&history, &incoming, self.settings.assembler);
        debug!(
            user_id,
            persisted = history.len(),
            incoming = incoming.len(),
            assembled = context.len(),
            "Context assembled"
        );

        if let Some(turn) = self.new_user_turn(&history, &incoming) {
            self.store_call("persist user turn", self.store.append_message(user_id, &turn))
                .await?;
        }

        let (reply, source) = self.generate(&context).await;

        let assistant = ChatMessage::assistant(reply.text.clone());
        self.store_call(
            "persist assistant turn",
            self.store.append_message(user_id, &assistant),
        )
        .await?;

        info!(user_id, source = ?source, "Companion reply ready");

        Ok(CompanionReply {
            reply: reply.text,
            suggested_actions: reply.suggested_actions,
            source,
        })
    }

    /// The trailing incoming user message, unless it is a resend of the
    /// newest persisted message.
    fn new_user_turn(&self, history: &[ChatMessage], incoming: &[ChatMessage]) -> Option<ChatMessage> {
        let last = incoming.last().filter(|m| m.role == Role::User)?;
        let trimmed = last.content.trim();
        if trimmed.is_empty() {
            return None;
        }
        let content = cap_content(trimmed, self.settings.assembler.content_cap_chars);

        let already_stored = history
            .first()
            .is_some_and(|newest| newest.role == Role::User && newest.content == content);
        (!already_stored).then(|| ChatMessage::user(content))
    }

    async fn generate(&self, context: &[ChatMessage]) -> (ModelReply, ReplySource) {
        let model = match &self.model {
            Some(model) if !context.is_empty() => model,
            _ => return (local_reply(context), ReplySource::Fallback),
        };

        match timeout(
            self.settings.model_deadline,
            model.complete(COMPANION_SYSTEM, context),
        )
        .await
        {
            Ok(Ok(reply)) => (reply, ReplySource::Model),
            Ok(Err(e)) => {
                warn!(backend = model.backend(), "Model call failed, using local reply: {e}");
                (local_reply(context), ReplySource::Fallback)
            }
            Err(_) => {
                warn!(
                    backend = model.backend(),
                    deadline_secs = self.settings.model_deadline.as_secs(),
                    "Model call exceeded deadline, using local reply"
                );
                (local_reply(context), ReplySource::Fallback)
            }
        }
    }

    /// Records the user row on a detached task; the turn never waits on it.
    fn record_user(&self, user_id: &str) {
        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();
        let deadline = self.settings.store_timeout;

        tokio::spawn(async move {
            match timeout(deadline, store.ensure_user(&user_id)).await {
                Ok(Ok(())) | Ok(Err(StoreError::Disabled)) => {}
                Ok(Err(e)) if e.is_degradable() => {
                    warn!(user_id = %user_id, "Could not record user: {e}")
                }
                Ok(Err(e)) => error!(user_id = %user_id, "Recording user failed: {e}"),
                Err(_) => warn!(user_id = %user_id, "Recording user timed out"),
            }
        });
    }

    /// Runs a storage call under the store deadline. Outages yield `Ok(None)`;
    /// rejected queries are raised.
    async fn store_call<T, F>(&self, op: &'static str, call: F) -> Result<Option<T>, AppError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        let result = match timeout(self.settings.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };

        match result {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::Disabled) => Ok(None),
            Err(e) if e.is_degradable() => {
                warn!(op, "Storage unavailable, continuing without it: {e}");
                Ok(None)
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::http::{header, HeaderValue};

    use super::*;
    use crate::conversation::store::{DisabledMessageStore, InMemoryMessageStore};
    use crate::llm_client::LlmError;

    /// Records every context it receives and answers with a fixed reply.
    #[derive(Default)]
    struct RecordingModel {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn complete(
            &self,
            system: &str,
            context: &[ChatMessage],
        ) -> Result<ModelReply, LlmError> {
            assert_eq!(system, COMPANION_SYSTEM);
            self.seen.lock().unwrap().push(context.to_vec());
            Ok(ModelReply {
                text: "model says hi".to_string(),
                suggested_actions: vec!["Reflect".to_string()],
            })
        }

        fn backend(&self) -> &'static str {
            "recording"
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn complete(&self, _: &str, _: &[ChatMessage]) -> Result<ModelReply, LlmError> {
            Err(LlmError::EmptyContent)
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    struct SlowModel;

    #[async_trait]
    impl ChatModel for SlowModel {
        async fn complete(&self, _: &str, _: &[ChatMessage]) -> Result<ModelReply, LlmError> {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok(ModelReply {
                text: "too late".to_string(),
                suggested_actions: vec![],
            })
        }

        fn backend(&self) -> &'static str {
            "slow"
        }
    }

    /// Answers instantly except for `ensure_user`, which hangs.
    #[derive(Default)]
    struct SlowUserStore {
        inner: InMemoryMessageStore,
    }

    #[async_trait]
    impl MessageStore for SlowUserStore {
        async fn ensure_user(&self, user_id: &str) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.inner.ensure_user(user_id).await
        }

        async fn recent_messages(
            &self,
            user_id: &str,
            limit: i64,
        ) -> Result<Vec<ChatMessage>, StoreError> {
            self.inner.recent_messages(user_id, limit).await
        }

        async fn append_message(
            &self,
            user_id: &str,
            message: &ChatMessage,
        ) -> Result<(), StoreError> {
            self.inner.append_message(user_id, message).await
        }

        async fn upsert_user(
            &self,
            email: Option<&str>,
            name: Option<&str>,
        ) -> Result<UserProfile, StoreError> {
            self.inner.upsert_user(email, name).await
        }

        async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
            self.inner.find_user(user_id).await
        }

        fn backend(&self) -> &'static str {
            "slow-users"
        }
    }

    /// Lets detached tasks spawned by the mediator run to completion.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn session_headers(m: &RequestMediator, user_id: &str) -> HeaderMap {
        let token = m.codec().issue(user_id).token;
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("feelos_session={token}")).unwrap(),
        );
        headers
    }

    fn mediator(
        store: Arc<dyn MessageStore>,
        model: Option<Arc<dyn ChatModel>>,
        limit: EndpointLimit,
    ) -> RequestMediator {
        RequestMediator::new(
            TokenCodec::new("mediator-test-secret", false).unwrap(),
            store,
            model,
            MediatorSettings::new(false, limit),
        )
    }

    fn chat_body(messages: &[(&str, &str)]) -> Vec<u8> {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|(role, content)| serde_json::json!({ "role": role, "content": content }))
            .collect();
        serde_json::to_vec(&serde_json::json!({ "messages": messages })).unwrap()
    }

    #[tokio::test]
    async fn test_first_contact_mints_cookie_and_uses_model() {
        let model = Arc::new(RecordingModel::default());
        let m = mediator(
            Arc::new(InMemoryMessageStore::default()),
            Some(model.clone()),
            EndpointLimit::new(20, 60_000),
        );

        let out = m
            .handle_chat(&HeaderMap::new(), &chat_body(&[("user", "hi")]))
            .await;

        assert!(out.set_cookie.is_some());
        let reply = out.result.unwrap();
        assert_eq!(reply.reply, "model says hi");
        assert_eq!(reply.source, ReplySource::Model);
        assert_eq!(
            model.seen.lock().unwrap()[0],
            vec![ChatMessage::user("hi")]
        );
    }

    #[tokio::test]
    async fn test_existing_session_reuses_identity_and_history() {
        let store = Arc::new(InMemoryMessageStore::with_history(
            "guest_returning",
            vec![ChatMessage::assistant("x"), ChatMessage::user("y")],
        ));
        let model = Arc::new(RecordingModel::default());
        let m = mediator(store.clone(), Some(model.clone()), EndpointLimit::new(20, 60_000));

        let headers = session_headers(&m, "guest_returning");

        let out = m
            .handle_chat(&headers, &chat_body(&[("user", "y")]))
            .await;

        assert!(out.set_cookie.is_none());
        assert!(out.result.is_ok());
        // Resent turn collapsed in the context and not stored twice.
        assert_eq!(
            model.seen.lock().unwrap()[0],
            vec![ChatMessage::assistant("x"), ChatMessage::user("y")]
        );
        assert_eq!(
            store.messages_for("guest_returning"),
            vec![
                ChatMessage::assistant("x"),
                ChatMessage::user("y"),
                ChatMessage::assistant("model says hi"),
            ]
        );
        settle().await;
        assert_eq!(store.users(), vec!["guest_returning".to_string()]);
    }

    #[tokio::test]
    async fn test_new_turn_and_reply_are_persisted() {
        let store = Arc::new(InMemoryMessageStore::default());
        let m = mediator(store.clone(), None, EndpointLimit::new(20, 60_000));

        let reply = m
            .converse("guest_1", vec![ChatMessage::user("  my resume  ")])
            .await
            .unwrap();

        assert_eq!(reply.source, ReplySource::Fallback);
        let stored = store.messages_for("guest_1");
        assert_eq!(stored[0], ChatMessage::user("my resume"));
        assert_eq!(stored[1].role, Role::Assistant);
        assert_eq!(stored[1].content, reply.reply);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_after_limit() {
        let m = mediator(
            Arc::new(InMemoryMessageStore::default()),
            None,
            EndpointLimit::new(2, 60_000),
        );
        let body = chat_body(&[("user", "hi")]);

        assert!(m.handle_chat(&HeaderMap::new(), &body).await.result.is_ok());
        assert!(m.handle_chat(&HeaderMap::new(), &body).await.result.is_ok());

        let rejected = m.handle_chat(&HeaderMap::new(), &body).await;
        // The cookieless caller still gets its minted identity back.
        assert!(rejected.set_cookie.is_some());
        assert!(matches!(
            rejected.result,
            Err(AppError::RateLimited { retry_after_secs }) if (1..=60).contains(&retry_after_secs)
        ));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_without_side_effects() {
        let store = Arc::new(InMemoryMessageStore::default());
        let model = Arc::new(RecordingModel::default());
        let m = mediator(store.clone(), Some(model.clone()), EndpointLimit::new(20, 60_000));

        let out = m
            .handle_chat(
                &HeaderMap::new(),
                &chat_body(&[("user", "fine"), ("robot", "bad")]),
            )
            .await;

        assert!(matches!(out.result, Err(AppError::Validation(_))));
        assert!(out.set_cookie.is_some());
        settle().await;
        assert!(model.seen.lock().unwrap().is_empty());
        assert!(store.users().is_empty());
    }

    #[tokio::test]
    async fn test_model_error_falls_back_locally() {
        let m = mediator(
            Arc::new(InMemoryMessageStore::default()),
            Some(Arc::new(FailingModel)),
            EndpointLimit::new(20, 60_000),
        );
        let reply = m
            .converse("guest_1", vec![ChatMessage::user("interview tips?")])
            .await
            .unwrap();
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.suggested_actions, vec!["Start mock interview"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_deadline_falls_back_locally() {
        let m = mediator(
            Arc::new(InMemoryMessageStore::default()),
            Some(Arc::new(SlowModel)),
            EndpointLimit::new(20, 60_000),
        );
        let reply = m
            .converse("guest_1", vec![ChatMessage::user("hello")])
            .await
            .unwrap();
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_ne!(reply.reply, "too late");
    }

    #[tokio::test]
    async fn test_empty_context_skips_model() {
        let model = Arc::new(RecordingModel::default());
        let m = mediator(
            Arc::new(InMemoryMessageStore::default()),
            Some(model.clone()),
            EndpointLimit::new(20, 60_000),
        );
        let reply = m.converse("guest_1", vec![]).await.unwrap();
        assert_eq!(reply.source, ReplySource::Fallback);
        assert!(reply.reply.starts_with("Hello"));
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_store_still_replies() {
        let m = mediator(
            Arc::new(DisabledMessageStore),
            Some(Arc::new(RecordingModel::default())),
            EndpointLimit::new(20, 60_000),
        );
        let reply = m
            .converse("guest_1", vec![ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(reply.source, ReplySource::Model);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_user_recording_does_not_delay_reply() {
        let store = Arc::new(SlowUserStore::default());
        let m = mediator(
            store.clone(),
            Some(Arc::new(RecordingModel::default())),
            EndpointLimit::new(20, 60_000),
        );

        let started = tokio::time::Instant::now();
        let reply = m
            .converse("guest_1", vec![ChatMessage::user("hi")])
            .await
            .unwrap();

        assert_eq!(reply.source, ReplySource::Model);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(store.inner.messages_for("guest_1").len(), 2);
    }

    #[tokio::test]
    async fn test_login_with_email_reuses_user() {
        let store = Arc::new(InMemoryMessageStore::default());
        let m = mediator(store.clone(), None, EndpointLimit::new(20, 60_000));

        let first = m
            .login(Some("kai@example.com".to_string()), Some("Kai".to_string()))
            .await
            .unwrap();
        let again = m
            .login(Some("kai@example.com".to_string()), None)
            .await
            .unwrap();

        assert_eq!(first.user.id, again.user.id);
        assert!(first.set_cookie.starts_with("feelos_session="));
        assert_eq!(store.users().len(), 1);

        let me = m
            .current_user(&session_headers(&m, &first.user.id))
            .await
            .unwrap();
        assert_eq!(
            me,
            Some(UserProfile {
                id: first.user.id.clone(),
                email: Some("kai@example.com".to_string()),
                name: None,
            })
        );
    }

    #[tokio::test]
    async fn test_login_without_store_issues_transient_guest() {
        let m = mediator(
            Arc::new(DisabledMessageStore),
            None,
            EndpointLimit::new(20, 60_000),
        );
        let signed = m.login(None, Some("Ada".to_string())).await.unwrap();

        assert!(signed.user.id.starts_with("guest_"));
        assert_eq!(signed.user.name.as_deref(), Some("Ada"));
        assert_eq!(
            m.codec().verify(
                signed
                    .set_cookie
                    .trim_start_matches("feelos_session=")
                    .split(';')
                    .next()
                    .unwrap()
            )
            .unwrap()
            .user_id,
            signed.user.id
        );
    }

    #[tokio::test]
    async fn test_current_user_lookup_rules() {
        let store = Arc::new(InMemoryMessageStore::default());
        let m = mediator(store.clone(), None, EndpointLimit::new(20, 60_000));

        assert_eq!(m.current_user(&HeaderMap::new()).await.unwrap(), None);
        // Valid session, but no row behind it.
        assert_eq!(
            m.current_user(&session_headers(&m, "guest_gone")).await.unwrap(),
            None
        );

        let disabled = mediator(
            Arc::new(DisabledMessageStore),
            None,
            EndpointLimit::new(20, 60_000),
        );
        assert_eq!(
            disabled
                .current_user(&session_headers(&disabled, "guest_7"))
                .await
                .unwrap(),
            Some(UserProfile::guest("guest_7"))
        );
    }
}
