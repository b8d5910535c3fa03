//! Self-hosted inference backend: POSTs `{ "messages": [...] }` to
//! `MODEL_INFERENCE_URL` and expects `{ "reply", "suggestedActions" }` back.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::conversation::models::ChatMessage;
use crate::llm_client::{wire_messages, ChatModel, LlmError, ModelReply, WireMessage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InferenceResponse {
    #[serde(default)]
    reply: String,
    #[serde(default)]
    suggested_actions: Vec<String>,
}

impl InferenceResponse {
    fn into_reply(self) -> Result<ModelReply, LlmError> {
        let text = self.reply.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(ModelReply {
            text: text.to_string(),
            suggested_actions: self.suggested_actions,
        })
    }
}

#[derive(Clone)]
pub struct InferenceProxy {
    client: Client,
    url: String,
}

impl InferenceProxy {
    pub fn new(url: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            url,
        })
    }
}

#[async_trait]
impl ChatModel for InferenceProxy {
    async fn complete(
        &self,
        system: &str,
        context: &[ChatMessage],
    ) -> Result<ModelReply, LlmError> {
        let response = self
            .client
            .post(&self.url)
            .json(&InferenceRequest {
                messages: wire_messages(system, context),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "model error".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<InferenceResponse>().await?.into_reply()
    }

    fn backend(&self) -> &'static str {
        "inference-proxy"
    }
}
