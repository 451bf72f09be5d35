//! The conversation loop.
//!
//! A call to [`Gateway::reply`] resolves the model, then alternates between
//! backend calls and tool execution until the backend answers without
//! requesting tools or the iteration limit is reached:
//!
//! ```text
//! AwaitingResponse -> ExecutingTools -> AwaitingResponse -> ... -> StreamingFinal -> Done
//! ```
//!
//! The caller sees one append-only stream of text chunks carrying only the
//! final answer. Without tools, streamed text is forwarded as it arrives. With
//! tools attached, a streamed response is held until it turns out to be final,
//! then released in the chunks it arrived in; non-streamed answers are
//! replayed as synthetic chunks.

use futures::future::join_all;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::GatewayError;
use crate::models::message::Message;
use crate::providers::base::{CompletionRequest, GenerationParams, StreamDelta};
use crate::retry::{self, RetryPolicy};
use crate::router::ProviderRegistry;
use crate::sandbox::{self, ToolRegistry, DEFAULT_TOOL_TIMEOUT};
use crate::transcoder;

pub const MAX_ITERATIONS: usize = 5;
pub const FALLBACK_MESSAGE: &str =
    "I wasn't able to finish this request within the allowed number of tool calls.";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upper bound on backend calls per turn
    pub max_iterations: usize,
    pub tool_timeout: Duration,
    pub retry: RetryPolicy,
    /// Sent when the limit is hit and the last response carried no text
    pub fallback_message: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            retry: RetryPolicy::default(),
            fallback_message: FALLBACK_MESSAGE.to_string(),
        }
    }
}

pub struct GatewayRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: ToolRegistry,
    pub params: GenerationParams,
}

impl GatewayRequest {
    pub fn new<S: Into<String>>(model: S, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            tools: ToolRegistry::default(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_system<S: Into<String>>(mut self, system: S) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingResponse,
    ExecutingTools,
    StreamingFinal,
    Done,
}

/// Per-call state; created for one reply and dropped with it
#[derive(Debug)]
pub struct GatewayTurn {
    pub history: Vec<Message>,
    /// Tool rounds completed so far
    pub iteration: usize,
    pub state: TurnState,
}

impl GatewayTurn {
    fn new(history: Vec<Message>) -> Self {
        Self {
            history,
            iteration: 0,
            state: TurnState::AwaitingResponse,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, TurnState::StreamingFinal | TurnState::Done)
    }
}

pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(registry: Arc<ProviderRegistry>, config: GatewayConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run one turn and stream the assistant's answer.
    ///
    /// A failure before any text was produced is the single `Err` item of the
    /// stream. A failure after that ends the stream with a diagnostic chunk.
    pub fn reply(&self, request: GatewayRequest) -> BoxStream<'_, Result<String, GatewayError>> {
        Box::pin(async_stream::stream! {
            let GatewayRequest { model, system, messages, tools, params } = request;

            let route = match self.registry.resolve(&model) {
                Ok(route) => route,
                Err(error) => {
                    tracing::warn!(model = %model, "no provider serves this model");
                    yield Err(error);
                    return;
                }
            };

            let descriptor = route.provider.descriptor();
            let alternatives = self.registry.alternatives(&route.model);
            let tool_descriptors = tools.descriptors();
            let live = descriptor.streams(!tool_descriptors.is_empty());
            // a response that may still request tools is not the answer yet
            let hold = !tool_descriptors.is_empty();
            let max_iterations = self.config.max_iterations.max(1);

            let mut turn = GatewayTurn::new(messages);
            let mut emitted = false;

            tracing::info!(
                model = %route.model,
                provider = %descriptor.id,
                live,
                tools = tool_descriptors.len(),
                "starting turn"
            );

            while !turn.is_terminal() {
                let completion_request = CompletionRequest {
                    model: route.model.clone(),
                    system: system.clone(),
                    messages: transcoder::encode(&turn.history, &descriptor),
                    tools: tool_descriptors.clone(),
                    params: params.clone(),
                };
                let provider = route.provider.as_ref();
                let outgoing = &completion_request;

                let mut text = String::new();
                let mut tool_calls = Vec::new();
                let mut pending: Vec<String> = Vec::new();
                let mut streamed = false;

                let outcome = if live {
                    let attempt = self
                        .config
                        .retry
                        .run("stream", move |_| provider.stream(outgoing));
                    match attempt.await {
                        Ok(mut deltas) => {
                            let mut failure = None;
                            while let Some(delta) = deltas.next().await {
                                match delta {
                                    Ok(StreamDelta::ToolCall(call)) => tool_calls.push(call),
                                    Ok(StreamDelta::Usage(usage)) => {
                                        tracing::debug!(?usage, "stream usage");
                                    }
                                    Ok(delta) => {
                                        if let Some(chunk) = transcoder::decode(&delta) {
                                            let chunk = chunk.to_string();
                                            text.push_str(&chunk);
                                            if hold {
                                                pending.push(chunk);
                                            } else {
                                                streamed = true;
                                                emitted = true;
                                                yield Ok(chunk);
                                            }
                                        }
                                    }
                                    Err(error) => {
                                        failure = Some(error);
                                        break;
                                    }
                                }
                            }
                            failure.map_or(Ok(()), Err)
                        }
                        Err(error) => Err(error),
                    }
                } else {
                    let attempt = self
                        .config
                        .retry
                        .run("complete", move |_| provider.complete(outgoing));
                    match attempt.await {
                        Ok(completion) => {
                            tracing::debug!(usage = ?completion.usage, "completion usage");
                            text = completion.message.text;
                            tool_calls = completion.message.tool_calls;
                            Ok(())
                        }
                        Err(error) => Err(error),
                    }
                };

                if let Err(error) = outcome {
                    let error = retry::surface(error, &alternatives);
                    tracing::warn!(
                        model = %route.model,
                        iteration = turn.iteration,
                        error = %error,
                        "turn failed"
                    );
                    turn.state = TurnState::Done;
                    if emitted {
                        yield Ok(format!("\n\n[modelgate error: {}]", error));
                    } else {
                        yield Err(error);
                    }
                    return;
                }

                let at_limit = turn.iteration + 1 >= max_iterations;
                if tool_calls.is_empty() || at_limit {
                    if !tool_calls.is_empty() {
                        tracing::warn!(
                            max_iterations,
                            skipped = tool_calls.len(),
                            "iteration limit reached, answering without running requested tools"
                        );
                    }
                    turn.state = TurnState::StreamingFinal;
                    if !streamed {
                        let chunks = if tool_calls.is_empty() || !text.trim().is_empty() {
                            if pending.is_empty() {
                                transcoder::synthetic_chunks(&text)
                            } else {
                                pending
                            }
                        } else {
                            transcoder::synthetic_chunks(&self.config.fallback_message)
                        };
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    tracing::info!(
                        model = %route.model,
                        backend_calls = turn.iteration + 1,
                        "turn finished"
                    );
                    turn.state = TurnState::Done;
                    continue;
                }

                turn.iteration += 1;
                turn.state = TurnState::ExecutingTools;
                tracing::debug!(
                    iteration = turn.iteration,
                    calls = tool_calls.len(),
                    "executing tool calls"
                );

                let results = join_all(
                    tool_calls
                        .iter()
                        .map(|call| sandbox::execute_call(&tools, call, self.config.tool_timeout)),
                )
                .await;

                turn.history.push(Message::assistant().with_text(text).with_tool_calls(tool_calls));
                turn.history.extend(results.iter().map(Message::tool_result));
                turn.state = TurnState::AwaitingResponse;
            }
        })
    }

    /// Run one turn and collect the streamed answer
    pub async fn complete(&self, request: GatewayRequest) -> Result<String, GatewayError> {
        let mut chunks = self.reply(request);
        let mut answer = String::new();
        while let Some(chunk) = chunks.next().await {
            answer.push_str(&chunk?);
        }
        Ok(answer)
    }
}
