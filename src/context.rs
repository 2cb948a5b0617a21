//! Per-agent conversation buffer.
//!
//! Every agent owns exactly one [`Buffer`]. Entries are appended in
//! chronological order and are never reordered, rewritten or pruned.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};

/// Text sent along with tool images.
pub const TOOL_IMAGES_PREAMBLE: &str = "Here are the tool output images:\n";

/// An image reference carried by a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Image {
    /// A remote URL or an already encoded `data:` URI.
    Url { url: String },
    /// A raw base64 payload.
    Base64 { data: String, mime: String },
}

impl Image {
    pub fn url(url: impl Into<String>) -> Self {
        Image::Url { url: url.into() }
    }

    pub fn base64(data: impl Into<String>, mime: impl Into<String>) -> Self {
        Image::Base64 {
            data: data.into(),
            mime: mime.into(),
        }
    }

    /// Render as something an `image_url` content part accepts.
    pub fn to_url(&self) -> String {
        match self {
            Image::Url { url } => url.clone(),
            Image::Base64 { data, mime } => format!("data:{};base64,{}", mime, data),
        }
    }
}

impl From<&str> for Image {
    /// URLs and data URIs pass through; anything else is taken as a base64 JPEG.
    fn from(value: &str) -> Self {
        if value.starts_with("http://")
            || value.starts_with("https://")
            || value.starts_with("data:")
        {
            Image::url(value)
        } else {
            Image::base64(value, "image/jpeg")
        }
    }
}

impl From<String> for Image {
    fn from(value: String) -> Self {
        Image::from(value.as_str())
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id; the matching tool-result entry carries the same id.
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it.
    pub arguments: String,
}

/// One buffer entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Entry {
    System {
        content: String,
    },
    User {
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<Image>,
    },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Entry {
    pub fn system(content: impl Into<String>) -> Self {
        Entry::System {
            content: content.into(),
        }
    }

    /// Build a user entry. At least one of text or images is required.
    pub fn user(text: Option<String>, images: Vec<Image>) -> Result<Self> {
        if text.is_none() && images.is_empty() {
            return Err(Error::contract("user message needs text or images"));
        }
        Ok(Entry::User { text, images })
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Entry::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Entry::Tool { .. })
    }
}

/// Append-only message buffer owned by one agent.
///
/// The lock is only held for the duration of a single append or snapshot,
/// never across an await point, so reentrant invocations of the same agent
/// cannot deadlock on it.
#[derive(Debug)]
pub struct Buffer {
    owner: String,
    entries: Mutex<Vec<Entry>>,
}

impl Buffer {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn push(&self, entry: Entry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(entry);
        tracing::trace!(agent = %self.owner, len = entries.len(), "buffer append");
    }

    /// Copy of all entries in chronological order.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_from_str() {
        assert_eq!(
            Image::from("https://example.com/cat.png"),
            Image::url("https://example.com/cat.png")
        );
        assert_eq!(
            Image::from("aGVsbG8="),
            Image::base64("aGVsbG8=", "image/jpeg")
        );
        assert_eq!(
            Image::from("aGVsbG8=").to_url(),
            "data:image/jpeg;base64,aGVsbG8="
        );
    }

    #[test]
    fn test_user_entry_requires_content() {
        assert!(Entry::user(None, Vec::new()).is_err());
        assert!(Entry::user(Some("hi".into()), Vec::new()).is_ok());
        assert!(Entry::user(None, vec![Image::url("https://x/y.png")]).is_ok());
    }

    #[test]
    fn test_buffer_is_chronological() {
        let buffer = Buffer::new("writer");
        buffer.push(Entry::system("be brief"));
        buffer.push(Entry::user(Some("hello".into()), Vec::new()).unwrap());
        buffer.push(Entry::tool("call_1", "search", "found"));

        let entries = buffer.snapshot();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], Entry::System { .. }));
        assert!(matches!(entries[1], Entry::User { .. }));
        assert!(entries[2].is_tool_result());
        assert_eq!(buffer.owner(), "writer");
    }

    #[test]
    fn test_entry_serializes_with_role_tag() {
        let value = serde_json::to_value(Entry::tool("c1", "lookup", "ok")).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "c1");
    }
}
