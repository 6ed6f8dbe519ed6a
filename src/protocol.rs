use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub(crate) model: &'a str,
    pub(crate) messages: &'a [ChatMessage],
    pub(crate) stream: bool,
    pub(crate) temperature: f32,
    pub(crate) max_tokens: u32,
}

/// One `data:` payload of a streamed completion.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub(crate) choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub(crate) delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkDelta {
    #[serde(default)]
    pub(crate) content: Option<String>,
}

impl ChatCompletionChunk {
    pub(crate) fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub(crate) choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseChoice {
    pub(crate) message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub(crate) content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelsResponse {
    pub(crate) data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelEntry {
    pub(crate) id: String,
}

/// Element of the sequence produced by [`crate::stream::stream_chat`].
///
/// Exactly one element per stream has `is_complete` set, and it is always
/// the last one. An `error` is only ever carried by that terminal element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResponse {
    pub content: String,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamResponse {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_complete: false,
            error: None,
        }
    }

    pub fn complete() -> Self {
        Self {
            content: String::new(),
            is_complete: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            is_complete: true,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_openai_shape() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let request = ChatCompletionRequest {
            model: "gpt-4o",
            messages: &messages,
            stream: true,
            temperature: 0.5,
            max_tokens: 2000,
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ],
                "stream": true,
                "temperature": 0.5,
                "max_tokens": 2000
            })
        );
    }

    #[test]
    fn chunk_content_reads_first_choice_only() {
        let chunk: ChatCompletionChunk = serde_json::from_value(json!({
            "choices": [
                {"delta": {"content": "first"}},
                {"delta": {"content": "second"}}
            ]
        }))
        .unwrap();
        assert_eq!(chunk.into_content().as_deref(), Some("first"));

        let role_only: ChatCompletionChunk =
            serde_json::from_value(json!({"choices": [{"delta": {"role": "assistant"}}]}))
                .unwrap();
        assert_eq!(role_only.into_content(), None);

        let empty: ChatCompletionChunk = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.into_content(), None);
    }

    #[test]
    fn stream_response_omits_missing_error() {
        assert_eq!(
            serde_json::to_value(StreamResponse::delta("x")).unwrap(),
            json!({"content": "x", "isComplete": false})
        );
        assert_eq!(
            serde_json::to_value(StreamResponse::failed("boom")).unwrap(),
            json!({"content": "", "isComplete": true, "error": "boom"})
        );
    }
}
