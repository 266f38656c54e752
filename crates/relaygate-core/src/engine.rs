use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relaygate_protocol::anthropic::{MessagesRequest, MessagesResponse};
use relaygate_protocol::openai::{ChatCompletionRequest, ChatCompletionResponse, ModelList as OpenAiModelList};
use relaygate_protocol::upstream::GenerateAssistantResponseRequest;

use crate::auth::SharedAuthManager;
use crate::dialects::{self, outbound_anthropic, outbound_openai};
use crate::error::GatewayError;
use crate::event_stream::UpstreamEvent;
use crate::model_cache::ModelCache;
use crate::token_counter::TokenCounter;
use crate::upstream_client::{RetryClient, RetryOutcome};

pub struct EngineConfig {
    pub api_endpoint: String,
    pub profile_arn: Option<String>,
    pub tool_description_max_length: usize,
    pub first_byte_timeout: Duration,
    pub first_byte_max_retries: u32,
}

/// Wires the Auth Manager, Model Cache, HTTP Retry Client, dialect
/// translators and Stream Coordinator together behind one request surface.
pub struct Engine {
    pub auth: SharedAuthManager,
    pub model_cache: Arc<ModelCache>,
    pub retry_client: Arc<RetryClient>,
    pub token_counter: TokenCounter,
    pub config: EngineConfig,
}

pub enum ChatOutcome {
    Json(ChatCompletionResponse),
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

pub enum MessagesOutcome {
    Json(MessagesResponse),
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

impl Engine {
    pub async fn chat_completions(&self, request: ChatCompletionRequest) -> Result<ChatOutcome, GatewayError> {
        let stream = request.stream;
        let model = request.model.clone();
        let canonical = dialects::from_openai_request(request, self.config.tool_description_max_length)?;
        let completion_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
        let created = now_unix();

        if !stream {
            let outcome = self.run_upstream(&canonical, |_event| {}).await?;
            let response = outbound_openai::completion_response(
                &completion_id,
                created,
                &model,
                &outcome.text,
                &outcome.tool_calls,
                outcome.usage,
            );
            return Ok(ChatOutcome::Json(response));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let mut content_started = false;
        let outcome = self
            .run_upstream(&canonical, |event| {
                if let UpstreamEvent::Content(text) = event {
                    let is_first = !content_started;
                    content_started = true;
                    let _ = tx.try_send(outbound_openai::content_delta_chunk(
                        &completion_id,
                        created,
                        &model,
                        text,
                        is_first,
                    ));
                }
            })
            .await?;

        for call in &outcome.tool_calls {
            let _ = tx
                .send(outbound_openai::tool_call_chunk(&completion_id, created, &model, call))
                .await;
        }
        let reason = outbound_openai::finish_reason(!outcome.tool_calls.is_empty());
        let _ = tx
            .send(outbound_openai::final_chunk(&completion_id, created, &model, reason))
            .await;
        let _ = tx
            .send(outbound_openai::usage_chunk(&completion_id, created, &model, outcome.usage))
            .await;
        let _ = tx.send(outbound_openai::terminator()).await;

        Ok(ChatOutcome::Stream(rx))
    }

    pub async fn messages(&self, request: MessagesRequest) -> Result<MessagesOutcome, GatewayError> {
        let stream = request.stream;
        let model = request.model.clone();
        let canonical = dialects::from_anthropic_request(request, self.config.tool_description_max_length)?;
        let message_id = format!("msg_{}", uuid::Uuid::new_v4());

        if !stream {
            let outcome = self.run_upstream(&canonical, |_event| {}).await?;
            let response = outbound_anthropic::messages_response(
                &message_id,
                &model,
                &outcome.text,
                &outcome.tool_calls,
                outcome.usage,
            );
            return Ok(MessagesOutcome::Json(response));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let _ = tx
            .send(outbound_anthropic::encode_event(&outbound_anthropic::message_start(
                &message_id,
                &model,
            )))
            .await;

        let mut content_started = false;
        let outcome = self
            .run_upstream(&canonical, |event| {
                if let UpstreamEvent::Content(text) = event {
                    if !content_started {
                        content_started = true;
                        let _ = tx.try_send(outbound_anthropic::encode_event(
                            &outbound_anthropic::content_block_start_text(0),
                        ));
                    }
                    let _ = tx.try_send(outbound_anthropic::encode_event(
                        &outbound_anthropic::content_block_delta_text(0, text),
                    ));
                }
            })
            .await?;

        let mut index = 0u32;
        if content_started {
            let _ = tx
                .send(outbound_anthropic::encode_event(&outbound_anthropic::content_block_stop(index)))
                .await;
            index += 1;
        }
        for call in &outcome.tool_calls {
            let _ = tx
                .send(outbound_anthropic::encode_event(
                    &outbound_anthropic::content_block_start_tool_use(index, call),
                ))
                .await;
            let _ = tx
                .send(outbound_anthropic::encode_event(&outbound_anthropic::content_block_delta_input_json(
                    index,
                    &call.arguments_json,
                )))
                .await;
            let _ = tx
                .send(outbound_anthropic::encode_event(&outbound_anthropic::content_block_stop(index)))
                .await;
            index += 1;
        }

        let reason = outbound_anthropic::stop_reason(!outcome.tool_calls.is_empty());
        let _ = tx
            .send(outbound_anthropic::encode_event(&outbound_anthropic::message_delta(
                reason,
                outcome.usage,
            )))
            .await;
        let _ = tx
            .send(outbound_anthropic::encode_event(&outbound_anthropic::message_stop()))
            .await;

        Ok(MessagesOutcome::Stream(rx))
    }

    async fn run_upstream(
        &self,
        canonical: &relaygate_protocol::CanonicalRequest,
        mut on_event: impl FnMut(&UpstreamEvent),
    ) -> Result<crate::coordinator::StreamOutcome, GatewayError> {
        let envelope: GenerateAssistantResponseRequest =
            dialects::build_upstream_request(canonical, self.config.profile_arn.as_deref());
        let max_input_tokens = self
            .model_cache
            .get_max_input_tokens(&canonical.model_id, &self.retry_client)
            .await;
        let prompt_tokens = self
            .token_counter
            .count_messages(&canonical.messages, canonical.system_prompt.as_deref())
            + self.token_counter.count_tool_schemas(&canonical.tools);

        let mut attempts = 0;
        loop {
            let outcome = self
                .attempt_upstream(&envelope, prompt_tokens, Some(max_input_tokens), &mut on_event)
                .await;
            match outcome {
                Err(GatewayError::FirstByteTimeout) if attempts < self.config.first_byte_max_retries => {
                    attempts += 1;
                    continue;
                }
                other => return other,
            }
        }
    }

    async fn attempt_upstream(
        &self,
        envelope: &GenerateAssistantResponseRequest,
        prompt_tokens: u64,
        max_input_tokens: Option<u64>,
        on_event: &mut impl FnMut(&UpstreamEvent),
    ) -> Result<crate::coordinator::StreamOutcome, GatewayError> {
        let url = format!("{}/GenerateAssistantResponse", self.config.api_endpoint);
        let outcome = self
            .retry_client
            .execute(
                |credential| {
                    self.retry_client
                        .http()
                        .post(&url)
                        .bearer_auth(credential)
                        .json(envelope)
                },
                true,
            )
            .await?;

        let response = match outcome {
            RetryOutcome::Response(response) => response,
            RetryOutcome::ClientError(response) => {
                return Err(GatewayError::Upstream {
                    status: axum::http::StatusCode::from_u16(response.status().as_u16())
                        .unwrap_or(axum::http::StatusCode::BAD_GATEWAY),
                });
            }
        };

        let byte_stream = response.bytes_stream();
        crate::coordinator::drive_stream(
            byte_stream,
            self.config.first_byte_timeout,
            prompt_tokens,
            max_input_tokens,
            &self.token_counter,
            |event| on_event(event),
        )
        .await
    }

    pub async fn openai_models(&self) -> OpenAiModelList {
        let entries = self.model_cache.snapshot(&self.retry_client).await;
        relaygate_protocol::openai::ModelList {
            object: "list".to_string(),
            data: entries
                .into_iter()
                .map(|(id, _)| relaygate_protocol::openai::ModelRecord {
                    id,
                    object: "model".to_string(),
                    created: 0,
                    owned_by: "relaygate".to_string(),
                })
                .collect(),
        }
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
