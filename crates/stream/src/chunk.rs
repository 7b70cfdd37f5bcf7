use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::error::{DecodeError, JsonSnafu};

/// Marker that opens every event line.
pub const DATA_PREFIX: &str = "data:";

/// Payload that ends a stream regardless of JSON validity.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Text,
    Image,
    Chart,
    Error,
    #[serde(other)]
    Unknown,
}

/// One decoded server event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub done: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChunkType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl StreamChunk {
    pub fn text(id: impl Into<String>, content: impl Into<String>, done: bool) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            done,
            kind: None,
            images: None,
        }
    }

    pub fn image(id: impl Into<String>, images: Vec<String>, done: bool) -> Self {
        Self {
            id: id.into(),
            content: String::new(),
            done,
            kind: Some(ChunkType::Image),
            images: Some(images),
        }
    }

    /// Chunk standing in for a payload that could not be parsed.
    pub fn fallback(raw: impl Into<String>) -> Self {
        Self::text(String::new(), raw, false)
    }

    pub fn parse(payload: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(payload).context(JsonSnafu {
            stage: "parse-stream-chunk",
        })
    }

    pub fn is_image(&self) -> bool {
        self.kind == Some(ChunkType::Image)
    }

    /// Renders the chunk as one wire line, newline included.
    pub fn to_wire_line(&self) -> String {
        // Serializing a plain struct of strings and bools cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{DATA_PREFIX} {json}\n")
    }
}

/// Request body for one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            message: message.into(),
            images: (!images.is_empty()).then_some(images),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_record() {
        let chunk = StreamChunk::parse(
            r#"{"id":"m1","content":"","done":false,"type":"image","images":["a.png","b.png"]}"#,
        )
        .expect("valid record");

        assert_eq!(chunk.id, "m1");
        assert!(chunk.is_image());
        assert_eq!(
            chunk.images,
            Some(vec!["a.png".to_string(), "b.png".to_string()])
        );
    }

    #[test]
    fn missing_fields_take_defaults() {
        let chunk = StreamChunk::parse(r#"{"content":"hi"}"#).expect("valid record");
        assert_eq!(chunk, StreamChunk::text("", "hi", false));
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let chunk =
            StreamChunk::parse(r#"{"id":"m1","content":"x","done":false,"type":"audio"}"#)
                .expect("valid record");
        assert_eq!(chunk.kind, Some(ChunkType::Unknown));
        assert!(!chunk.is_image());
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        assert!(StreamChunk::parse("{\"id\":").is_err());
        assert!(StreamChunk::parse("plain words").is_err());
    }

    #[test]
    fn wire_line_uses_data_prefix() {
        let line = StreamChunk::text("m1", "He", false).to_wire_line();
        assert_eq!(line, "data: {\"id\":\"m1\",\"content\":\"He\",\"done\":false}\n");
    }

    #[test]
    fn request_omits_empty_images() {
        let json = serde_json::to_string(&ChatRequest::new("hi", Vec::new())).expect("serializes");
        assert_eq!(json, r#"{"message":"hi"}"#);

        let json = serde_json::to_string(&ChatRequest::new("hi", vec!["a.png".into()]))
            .expect("serializes");
        assert_eq!(json, r#"{"message":"hi","images":["a.png"]}"#);
    }
}
