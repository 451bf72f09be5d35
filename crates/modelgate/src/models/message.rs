use super::content::FilePart;
use super::role::Role;
use super::tool::{ToolCallRequest, ToolCallResult};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// A message to or from an LLM, independent of any backend
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub text: String,
    /// Attachments in the order the caller supplied them
    pub parts: Vec<FilePart>,
    /// Tool calls issued by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set only on tool messages, naming the call they answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            text: String::new(),
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new system message with the current timestamp
    pub fn system() -> Self {
        Self::new(Role::System)
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Self::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Create the tool message answering a tool call; the text is the JSON payload
    pub fn tool_result(result: &ToolCallResult) -> Self {
        let mut message = Self::new(Role::Tool);
        message.text = result.payload.to_string();
        message.tool_call_id = Some(result.tool_call_id.clone());
        message
    }

    /// Add text to the message, separated from existing text by a newline
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        let text = text.into();
        if self.text.is_empty() {
            self.text = text;
        } else if !text.is_empty() {
            self.text.push('\n');
            self.text.push_str(&text);
        }
        self
    }

    /// Attach a file part to the message
    pub fn with_file(mut self, part: FilePart) -> Self {
        self.parts.push(part);
        self
    }

    /// Add a tool call to an assistant message
    pub fn with_tool_call(mut self, request: ToolCallRequest) -> Self {
        self.tool_calls.push(request);
        self
    }

    pub fn with_tool_calls<I: IntoIterator<Item = ToolCallRequest>>(mut self, requests: I) -> Self {
        self.tool_calls.extend(requests);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }
}
