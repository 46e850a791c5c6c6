//! Conversation record model.
//!
//! Mirrors the backend conversation JSON: a flat `mapping` of node ids to
//! nodes that link to each other through `parent` / `children`.
//!
//! ```json
//! {
//!   "title": "T",
//!   "create_time": 1712345678.9,
//!   "mapping": {
//!     "root": { "children": ["m1"] },
//!     "m1": {
//!       "parent": "root",
//!       "message": { "author": { "role": "user" }, "content": { "content_type": "text", "parts": ["hello"] } }
//!     }
//!   }
//! }
//! ```
//!
//! Message content is resolved once, at deserialization time, into the closed
//! [`Content`] enum so downstream code matches on variants instead of probing
//! optional fields.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Scheme-less content type tags used by the backend.
const CONTENT_TYPE_CODE: &str = "code";
const CONTENT_TYPE_MULTIMODAL: &str = "multimodal_text";
const CONTENT_TYPE_IMAGE_POINTER: &str = "image_asset_pointer";

/// A full conversation as returned by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub create_time: Option<f64>,
    #[serde(default)]
    pub update_time: Option<f64>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Node id → node, in document order. `None` when the record has no mapping at all.
    #[serde(default)]
    pub mapping: Option<IndexMap<String, Node>>,
}

impl ConversationRecord {
    /// Parses a record from its JSON text.
    ///
    /// # Errors
    /// Returns an error if the text is not a JSON object of the expected shape.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.create_time.and_then(timestamp_from_secs)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.update_time.and_then(timestamp_from_secs)
    }

    /// Returns the title trimmed, or `None` when absent or blank.
    pub fn display_title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// One entry of the conversation tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

impl Node {
    /// An empty-string parent counts as no parent.
    pub fn has_parent(&self) -> bool {
        self.parent.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Author role of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Tool,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Other(name) => name,
        }
    }

    /// Heading label: `USER`, `ASSISTANT`, or `(ROLE)` for everything else.
    pub fn label(&self) -> String {
        match self {
            Role::User => "USER".to_string(),
            Role::Assistant => "ASSISTANT".to_string(),
            other => format!("({})", other.as_str()).to_uppercase(),
        }
    }

    /// Whether this role is rendered when only conversational roles are shown.
    pub fn is_conversational(&self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Other("unknown".to_string())
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            "" => Role::default(),
            _ => Role::Other(value),
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.map(Role::from).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub role: Role,
}

/// A single message attached to a node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author: Author,
    #[serde(default)]
    pub create_time: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: Content,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn role(&self) -> &Role {
        &self.author.role
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.create_time.and_then(timestamp_from_secs)
    }

    /// Canvas document id carried by "apply the pending update now" tool messages.
    pub fn canvas_document_id(&self) -> Option<&str> {
        self.metadata
            .canvas
            .as_ref()
            .and_then(|c| c.textdoc_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub canvas: Option<CanvasMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CanvasMetadata {
    #[serde(default)]
    pub textdoc_id: Option<String>,
}

/// Message content, resolved from the raw JSON shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawContent")]
pub enum Content {
    /// A single text blob (`content.text`).
    Text(String),
    /// Textual parts (`content.parts`), joined with newlines for display.
    Parts(Vec<String>),
    /// A `code` payload; assistant code payloads may announce canvas edits.
    Code {
        text: String,
        language: Option<String>,
    },
    /// Ordered parts that may reference remote images.
    Multimodal(Vec<ContentPart>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Parts(Vec::new())
    }
}

impl Content {
    /// Text used when the message is rendered as an ordinary block.
    pub fn plain_text(&self) -> String {
        match self {
            Content::Text(text) | Content::Code { text, .. } => text.clone(),
            Content::Parts(parts) => parts.join("\n"),
            Content::Multimodal(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One part of a multimodal message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image(ImagePart),
    Other,
}

/// A reference to a remote image attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    /// Opaque pointer token, e.g. `file-service://file-abc123`.
    pub asset_pointer: String,
    /// Image-generation prompt, when the image was generated.
    pub prompt: Option<String>,
}

impl ContentPart {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => ContentPart::Text(text.clone()),
            Value::Object(obj)
                if obj.get("content_type").and_then(Value::as_str)
                    == Some(CONTENT_TYPE_IMAGE_POINTER) =>
            {
                let Some(pointer) = obj
                    .get("asset_pointer")
                    .and_then(Value::as_str)
                    .filter(|p| !p.is_empty())
                else {
                    return ContentPart::Other;
                };
                let prompt = value
                    .pointer("/metadata/dalle/prompt")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(ToString::to_string);
                ContentPart::Image(ImagePart {
                    asset_pointer: pointer.to_string(),
                    prompt,
                })
            }
            _ => ContentPart::Other,
        }
    }
}

/// Wire shape of `message.content`; every field is optional.
#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    parts: Option<Vec<Value>>,
    #[serde(default)]
    language: Option<String>,
}

impl From<RawContent> for Content {
    fn from(raw: RawContent) -> Self {
        let text = match raw.text {
            Some(Value::String(text)) => Some(text),
            _ => None,
        };

        match (raw.content_type.as_deref(), text, raw.parts) {
            (Some(CONTENT_TYPE_CODE), Some(text), _) => Content::Code {
                text,
                language: raw.language,
            },
            (Some(CONTENT_TYPE_MULTIMODAL), _, Some(parts)) => {
                Content::Multimodal(parts.iter().map(ContentPart::from_value).collect())
            }
            (_, Some(text), _) => Content::Text(text),
            (_, None, Some(parts)) => Content::Parts(
                parts
                    .into_iter()
                    .filter_map(|part| match part {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            (_, None, None) => Content::default(),
        }
    }
}

/// Converts fractional Unix seconds into a UTC timestamp.
pub fn timestamp_from_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

/// Treats an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn content(value: Value) -> Content {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_parts_content() {
        let c = content(json!({"content_type": "text", "parts": ["a", "b"]}));
        assert_eq!(c, Content::Parts(vec!["a".into(), "b".into()]));
        assert_eq!(c.plain_text(), "a\nb");
    }

    #[test]
    fn test_direct_text_wins_over_parts() {
        let c = content(json!({"content_type": "tether_quote", "text": "blob", "parts": ["x"]}));
        assert_eq!(c, Content::Text("blob".into()));
    }

    #[test]
    fn test_code_content() {
        let c = content(json!({"content_type": "code", "language": "json", "text": "{}"}));
        assert_eq!(
            c,
            Content::Code {
                text: "{}".into(),
                language: Some("json".into())
            }
        );
    }

    #[test]
    fn test_code_without_text_string_is_not_code() {
        let c = content(json!({"content_type": "code", "text": 42}));
        assert_eq!(c, Content::Parts(Vec::new()));
    }

    #[test]
    fn test_multimodal_content_with_image_and_prompt() {
        let c = content(json!({
            "content_type": "multimodal_text",
            "parts": [
                {
                    "content_type": "image_asset_pointer",
                    "asset_pointer": "file-service://file-1",
                    "metadata": {"dalle": {"prompt": "  a cat  "}}
                },
                "caption",
                {"content_type": "audio_asset_pointer"}
            ]
        }));
        let Content::Multimodal(parts) = c else {
            panic!("expected multimodal content");
        };
        assert_eq!(
            parts,
            vec![
                ContentPart::Image(ImagePart {
                    asset_pointer: "file-service://file-1".into(),
                    prompt: Some("a cat".into()),
                }),
                ContentPart::Text("caption".into()),
                ContentPart::Other,
            ]
        );
    }

    #[test]
    fn test_non_string_parts_are_ignored() {
        let c = content(json!({"content_type": "text", "parts": ["a", {"x": 1}, 3]}));
        assert_eq!(c.plain_text(), "a");
    }

    #[test]
    fn test_role_parsing_and_labels() {
        let msg: Message = serde_json::from_value(json!({"author": {"role": "system"}})).unwrap();
        assert_eq!(msg.role(), &Role::Other("system".into()));
        assert_eq!(msg.role().label(), "(SYSTEM)");
        assert_eq!(Role::User.label(), "USER");
        assert_eq!(Role::Assistant.label(), "ASSISTANT");
        assert_eq!(Role::Tool.label(), "(TOOL)");

        let missing: Message = serde_json::from_value(json!({"author": null})).unwrap();
        assert_eq!(missing.role(), &Role::Other("unknown".into()));
    }

    #[test]
    fn test_canvas_document_id() {
        let msg: Message = serde_json::from_value(json!({
            "author": {"role": "tool"},
            "metadata": {"canvas": {"textdoc_id": "doc-1"}}
        }))
        .unwrap();
        assert_eq!(msg.canvas_document_id(), Some("doc-1"));

        let empty: Message = serde_json::from_value(json!({
            "metadata": {"canvas": {"textdoc_id": ""}}
        }))
        .unwrap();
        assert_eq!(empty.canvas_document_id(), None);
    }

    #[test]
    fn test_record_without_mapping() {
        let record = ConversationRecord::from_json(r#"{"title": "x"}"#).unwrap();
        assert!(record.mapping.is_none());
    }

    #[test]
    fn test_mapping_preserves_document_order_and_null_children() {
        let record = ConversationRecord::from_json(
            r#"{"mapping": {"z": {"children": null}, "a": {"parent": "z"}, "m": {}}}"#,
        )
        .unwrap();
        let keys: Vec<_> = record.mapping.unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_timestamps() {
        let record = ConversationRecord {
            create_time: Some(0.0),
            update_time: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(record.created_at(), DateTime::from_timestamp(0, 0));
        assert_eq!(record.updated_at(), None);
        assert_eq!(
            timestamp_from_secs(1.5),
            DateTime::from_timestamp_millis(1500)
        );
    }

    #[test]
    fn test_display_title() {
        let blank = ConversationRecord {
            title: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(blank.display_title(), None);
        let titled = ConversationRecord {
            title: Some(" Notes ".into()),
            ..Default::default()
        };
        assert_eq!(titled.display_title(), Some("Notes"));
    }
}
