//! In-process echo provider. Answers every chat request with the last user
//! message's text, prefixed so it is unmistakably not a real model response.
//! Exists so the kernel's task-execution path has a concrete, testable
//! [`LlmProvider`] without speaking any vendor wire format.

use sa_domain::capability::{LlmCapabilities, ToolSupport};
use sa_domain::error::Result;
use sa_domain::stream::{BoxStream, StreamEvent, Usage};
use sa_domain::tool::Role;

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};

pub struct EchoProvider {
    provider_id: String,
    capabilities: LlmCapabilities,
}

impl EchoProvider {
    pub fn new(provider_id: impl Into<String>) -> Self {
        EchoProvider {
            provider_id: provider_id.into(),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::None,
                supports_streaming: true,
                supports_json_mode: false,
                supports_vision: false,
                context_window_tokens: None,
                max_output_tokens: None,
            },
        }
    }

    fn reply_to(&self, req: &ChatRequest) -> String {
        let last_user_text = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.text().map(str::to_string))
            .unwrap_or_default();
        format!("echo: {last_user_text}")
    }
}

#[async_trait::async_trait]
impl LlmProvider for EchoProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let content = self.reply_to(&req);
        Ok(ChatResponse {
            content,
            tool_calls: Vec::new(),
            usage: Some(Usage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            }),
            model: self.provider_id.clone(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let content = self.reply_to(&req);
        let events = vec![
            Ok(StreamEvent::Token { text: content }),
            Ok(StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    total_tokens: 0,
                }),
                finish_reason: Some("stop".into()),
            }),
        ];
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Ok(EmbeddingsResponse {
            embeddings: req.input.iter().map(|_| vec![0.0_f32; 1]).collect(),
        })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }
}
