//! Conversion between canonical messages and what a provider can accept.
//!
//! Providers with native structured content receive messages as they are and
//! render parts in their own wire format. For the others every multi-part
//! message is collapsed into plain text: the message text first, then each
//! file as a tagged `[File: name]` block.

use crate::models::content::{FileKind, FilePart};
use crate::models::message::Message;
use crate::providers::base::{ProviderDescriptor, StreamDelta};

/// Prepare the history for the target provider
pub fn encode(history: &[Message], target: &ProviderDescriptor) -> Vec<Message> {
    if target.native_content {
        return history.to_vec();
    }
    history
        .iter()
        .map(|message| {
            if message.is_multipart() {
                collapse(message)
            } else {
                message.clone()
            }
        })
        .collect()
}

/// Flatten a message's parts into its text
pub fn collapse(message: &Message) -> Message {
    let mut blocks = Vec::with_capacity(message.parts.len() + 1);
    if !message.text.is_empty() {
        blocks.push(message.text.clone());
    }
    blocks.extend(message.parts.iter().map(render_file_part));

    let mut collapsed = message.clone();
    collapsed.text = blocks.join("\n\n");
    collapsed.parts.clear();
    collapsed
}

/// Render a file as an inline text block
pub fn render_file_part(part: &FilePart) -> String {
    format!("[File: {}]\n{}", part.file_name, describe_part(part))
}

fn describe_part(part: &FilePart) -> String {
    match part.kind {
        FileKind::Text | FileKind::Binary => match part.as_utf8() {
            Some(text) => text.to_string(),
            None => placeholder(part),
        },
        FileKind::Image => format!("[image: {}, {} bytes]", part.mime_type, part.data.len()),
    }
}

fn placeholder(part: &FilePart) -> String {
    format!(
        "[binary content omitted: {}, {} bytes]",
        part.mime_type,
        part.data.len()
    )
}

/// The text carried by a delta, if any
pub fn decode(delta: &StreamDelta) -> Option<&str> {
    match delta {
        StreamDelta::Text(text) if !text.is_empty() => Some(text),
        _ => None,
    }
}

/// Split a settled answer into word-sized chunks. Concatenating the chunks
/// reproduces the input exactly.
pub fn synthetic_chunks(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}
