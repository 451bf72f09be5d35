use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// An attachment carried by a message, kept as raw bytes until a backend needs it
pub struct FilePart {
    pub kind: FileKind,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl FilePart {
    pub fn new<D, M, N>(kind: FileKind, data: D, mime_type: M, file_name: N) -> Self
    where
        D: Into<Vec<u8>>,
        M: Into<String>,
        N: Into<String>,
    {
        Self {
            kind,
            data: data.into(),
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    pub fn image<D: Into<Vec<u8>>, M: Into<String>, N: Into<String>>(
        data: D,
        mime_type: M,
        file_name: N,
    ) -> Self {
        Self::new(FileKind::Image, data, mime_type, file_name)
    }

    pub fn text<S: Into<String>, N: Into<String>>(text: S, file_name: N) -> Self {
        Self::new(FileKind::Text, text.into(), "text/plain", file_name)
    }

    pub fn binary<D: Into<Vec<u8>>, M: Into<String>, N: Into<String>>(
        data: D,
        mime_type: M,
        file_name: N,
    ) -> Self {
        Self::new(FileKind::Binary, data, mime_type, file_name)
    }

    /// The payload as text, if it is valid UTF-8
    pub fn as_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn is_image(&self) -> bool {
        self.kind == FileKind::Image
    }
}
