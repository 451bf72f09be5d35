use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::providers::base::{
    completion_to_deltas, Completion, CompletionRequest, DeltaStream, Provider,
    ProviderDescriptor, ProviderId, StreamDelta, Usage,
};

/// One scripted backend reaction
pub enum Step {
    Reply(Message),
    Fail(ProviderError),
    /// Stream this text, then fail
    BreakMidStream(String, ProviderError),
}

/// A mock provider that plays back pre-configured responses for testing
pub struct MockProvider {
    descriptor: ProviderDescriptor,
    models: Vec<String>,
    steps: Mutex<VecDeque<Step>>,
    /// Served once the script runs out
    repeat: Option<Message>,
    requests: Mutex<Vec<CompletionRequest>>,
    attempts: Mutex<Vec<Instant>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::scripted(responses.into_iter().map(Step::Reply).collect())
    }

    pub fn scripted(steps: Vec<Step>) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: ProviderId::OpenAi,
                streaming: false,
                streams_with_tools: false,
                native_content: true,
            },
            models: vec!["mock-model".to_string()],
            steps: Mutex::new(steps.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same message
    pub fn repeating(message: Message) -> Self {
        let mut provider = Self::scripted(Vec::new());
        provider.repeat = Some(message);
        provider
    }

    pub fn with_id(mut self, id: ProviderId) -> Self {
        self.descriptor.id = id;
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_streaming(mut self, streaming: bool, with_tools: bool) -> Self {
        self.descriptor.streaming = streaming;
        self.descriptor.streams_with_tools = with_tools;
        self
    }

    pub fn with_native_content(mut self, native: bool) -> Self {
        self.descriptor.native_content = native;
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn attempt_instants(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    fn next_step(&self, request: &CompletionRequest) -> Step {
        self.requests.lock().unwrap().push(request.clone());
        self.attempts.lock().unwrap().push(Instant::now());

        match self.steps.lock().unwrap().pop_front() {
            Some(step) => step,
            None => match &self.repeat {
                Some(message) => Step::Reply(message.clone()),
                None => Step::Fail(ProviderError::InvalidResponse(
                    "mock script exhausted".to_string(),
                )),
            },
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        self.descriptor
    }

    fn supports(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    fn supported_models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        match self.next_step(request) {
            Step::Reply(message) => Ok(Completion {
                message,
                usage: Usage::default(),
            }),
            Step::Fail(error) | Step::BreakMidStream(_, error) => Err(error),
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, ProviderError> {
        match self.next_step(request) {
            Step::Reply(message) => Ok(completion_to_deltas(Completion {
                message,
                usage: Usage::default(),
            })),
            Step::Fail(error) => Err(error),
            Step::BreakMidStream(text, error) => {
                Ok(stream::iter(vec![Ok(StreamDelta::Text(text)), Err(error)]).boxed())
            }
        }
    }
}
