//! Isolated, time-bounded execution of caller-registered tools.
//!
//! Every call runs on its own tokio task so a slow or blocking tool cannot
//! stall the conversation loop. Whatever happens inside (bad arguments, an
//! error, a panic, a timeout) comes back as a [`ToolCallResult`].

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

use crate::errors::{ToolError, ToolResult};
use crate::models::tool::{ToolCallRequest, ToolCallResult, ToolDescriptor};
use crate::providers::utils::sanitize_function_name;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Decoded keyword arguments of a tool call
pub type ToolArguments = Map<String, Value>;

#[async_trait]
pub trait ToolCallable: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn call(&self, arguments: ToolArguments) -> ToolResult<Value>;
}

/// A tool backed by a blocking closure, run on the blocking thread pool
pub struct FnTool<F> {
    descriptor: ToolDescriptor,
    func: Arc<F>,
}

impl<F> FnTool<F>
where
    F: Fn(ToolArguments) -> ToolResult<Value> + Send + Sync + 'static,
{
    pub fn new(descriptor: ToolDescriptor, func: F) -> Self {
        Self {
            descriptor,
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl<F> ToolCallable for FnTool<F>
where
    F: Fn(ToolArguments) -> ToolResult<Value> + Send + Sync + 'static,
{
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: ToolArguments) -> ToolResult<Value> {
        let func = Arc::clone(&self.func);
        tokio::task::spawn_blocking(move || func(arguments))
            .await
            .map_err(panic_error)?
    }
}

/// Name → callable mapping owned by the caller
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolCallable>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any registered under the same name
    pub fn register(&mut self, tool: Arc<dyn ToolCallable>) {
        let name = tool.descriptor().name.clone();
        self.tools.retain(|t| t.descriptor().name != name);
        self.tools.push(tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn ToolCallable>) -> Self {
        self.register(tool);
        self
    }

    /// Look a tool up by name. Names sent back by a backend may have been
    /// sanitized on the way out, so those are matched too.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolCallable>> {
        self.tools
            .iter()
            .find(|t| t.descriptor().name == name)
            .or_else(|| {
                self.tools
                    .iter()
                    .find(|t| sanitize_function_name(&t.descriptor().name) == name)
            })
            .cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Aborts the wrapped task when dropped, so an abandoned or timed-out call
/// does not keep running in the background.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub fn decode_arguments(raw: &str) -> ToolResult<ToolArguments> {
    if raw.trim().is_empty() {
        return Ok(ToolArguments::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            other
        ))),
        Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
    }
}

fn check_required(descriptor: &ToolDescriptor, arguments: &ToolArguments) -> ToolResult<()> {
    let missing: Vec<&str> = descriptor
        .required_parameters()
        .filter(|name| !arguments.contains_key(*name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(format!(
            "missing required parameter(s): {}",
            missing.join(", ")
        )))
    }
}

fn panic_error(err: JoinError) -> ToolError {
    if err.is_panic() {
        ToolError::Panicked(panic_message(err.into_panic()))
    } else {
        ToolError::ExecutionFailed("tool task was cancelled".to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run(
    tool: Arc<dyn ToolCallable>,
    raw_arguments: &str,
    timeout: Duration,
) -> ToolResult<Value> {
    let arguments = decode_arguments(raw_arguments)?;
    check_required(tool.descriptor(), &arguments)?;

    let mut task = AbortOnDrop(tokio::spawn(async move { tool.call(arguments).await }));
    match tokio::time::timeout(timeout, &mut task.0).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(panic_error(join_error)),
        Err(_) => Err(ToolError::Timeout(timeout)),
    }
}

/// Run one tool call. Never fails: problems become error payloads.
pub async fn execute(
    tool: Arc<dyn ToolCallable>,
    request: &ToolCallRequest,
    timeout: Duration,
) -> ToolCallResult {
    let name = tool.descriptor().name.clone();
    match run(tool, &request.raw_arguments, timeout).await {
        Ok(value) => {
            tracing::debug!(tool = %name, call_id = %request.id, "tool call succeeded");
            ToolCallResult::success(request.id.clone(), value)
        }
        Err(error) => {
            tracing::warn!(tool = %name, call_id = %request.id, error = %error, "tool call failed");
            ToolCallResult::error(request.id.clone(), &name, &error.to_string())
        }
    }
}

/// Look the requested tool up and run it
pub async fn execute_call(
    registry: &ToolRegistry,
    request: &ToolCallRequest,
    timeout: Duration,
) -> ToolCallResult {
    match registry.get(&request.tool_name) {
        Some(tool) => execute(tool, request, timeout).await,
        None => {
            let error = ToolError::NotFound(request.tool_name.clone());
            tracing::warn!(tool = %request.tool_name, "backend requested an unknown tool");
            ToolCallResult::error(request.id.clone(), &request.tool_name, &error.to_string())
        }
    }
}
