//! These models represent the objects passed around by the gateway
//!
//! There are several different related formats we need to interact with:
//! - the caller's conversation history, handed to the gateway as canonical messages
//! - openai chat-completions messages/tools, sent from the gateway to most backends
//! - anthropic messages/tools, sent from the gateway to anthropic
//! - server-sent deltas, streamed back from the backends
//!
//! We always immediately convert those data models into the internal structs using
//! to/from helpers in `providers::utils` and `transcoder`. The internal models are not
//! an exact match to any of the wire formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
