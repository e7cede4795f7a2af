use serde::{Deserialize, Serialize};

/// A file referenced by a message, optionally with its downloaded content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedFile {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    /// Inline text content, filled in during history reconstruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Marker left in place of `content` when the download failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SerializedFile {
    /// Whether the declared content type is one the engine can inline.
    pub fn is_text(&self) -> bool {
        self.content_type.contains("text/")
    }
}

/// One piece of a card document split across several events.
///
/// Pieces form a singly linked list through `next_fragment`. `index` is
/// informational only; link order decides how payloads are joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardFragment {
    #[serde(rename = "cardFragment")]
    pub payload: String,
    pub index: u32,
    pub total_parts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fragment: Option<String>,
}
