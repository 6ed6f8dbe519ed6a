use crate::error::{ClientError, ClientResult};
use crate::protocol::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ModelsResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client as HttpClient;
use std::time::Duration;
use tracing::{debug, warn};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Substrings a model id must contain to be offered by [`ChatClient::list_models`].
const MODEL_ALLOWLIST: [&str; 3] = ["gpt", "claude", "llama"];

/// Endpoint, credential and model of an OpenAI-compatible backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub token: String,
    pub model: String,
    /// Display name only; never affects requests.
    pub provider: String,
}

impl BackendConfig {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            model: model.into(),
            provider: String::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", normalize_base_url(&self.base_url), path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

pub type ByteStream = BoxStream<'static, ClientResult<Bytes>>;

/// The chat completion capability consumed by the stream decoder and the
/// task splitter.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn config(&self) -> &BackendConfig;

    /// Single non-streaming completion; returns the first choice's text.
    async fn complete(&self, messages: &[ChatMessage]) -> ClientResult<String>;

    /// Streaming completion; returns the raw SSE body.
    async fn open_stream(&self, messages: &[ChatMessage]) -> ClientResult<ByteStream>;
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    config: BackendConfig,
    params: GenerationParams,
    http: HttpClient,
}

impl ChatClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            params: GenerationParams::default(),
            http: HttpClient::new(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> GenerationParams {
        self.params
    }

    async fn post_completion(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> ClientResult<reqwest::Response> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            stream,
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
        };

        let response = self
            .http
            .post(self.config.endpoint("chat/completions"))
            .bearer_auth(&self.config.token)
            .json(&request)
            .send()
            .await?;

        check_status(response).await
    }

    /// Ids of the backend's chat models, filtered to known families and sorted.
    pub async fn list_models(&self) -> ClientResult<Vec<String>> {
        if self.config.token.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .get(self.config.endpoint("models"))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        let text = check_status(response).await?.text().await?;
        let body: ModelsResponse = serde_json::from_str(&text)?;

        let mut models: Vec<String> = body
            .data
            .into_iter()
            .map(|model| model.id)
            .filter(|id| MODEL_ALLOWLIST.iter().any(|family| id.contains(family)))
            .collect();
        models.sort();
        Ok(models)
    }

    pub async fn test_connection(&self) -> bool {
        if self.config.token.is_empty() {
            return false;
        }

        let result = self
            .http
            .get(self.config.endpoint("models"))
            .bearer_auth(&self.config.token)
            .timeout(CONNECTION_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(err) => {
                debug!(error = %err, "connection check failed");
                false
            }
        }
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn complete(&self, messages: &[ChatMessage]) -> ClientResult<String> {
        let response = self.post_completion(messages, false).await?;
        let text = response.text().await?;
        let body: ChatCompletionResponse = serde_json::from_str(&text)?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or(ClientError::EmptyResponse)
    }

    async fn open_stream(&self, messages: &[ChatMessage]) -> ClientResult<ByteStream> {
        let response = self.post_completion(messages, true).await?;
        Ok(response.bytes_stream().map_err(ClientError::from).boxed())
    }
}

async fn check_status(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    warn!(status, "backend returned an error status");
    Err(ClientError::Status { status, body })
}

fn normalize_base_url(value: &str) -> &str {
    value.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Json;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use serde_json::{Value, json};

    async fn spawn_server(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn bearer(headers: &HeaderMap) -> String {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn endpoint_trims_trailing_slashes() {
        let config = BackendConfig::new("https://api.example.com/v1//", "t", "m");
        assert_eq!(
            config.endpoint("chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn complete_posts_request_and_reads_first_choice() {
        let router = axum::Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let echo = format!(
                    "{}|{}|{}|{}",
                    bearer(&headers),
                    body["model"].as_str().unwrap_or_default(),
                    body["stream"],
                    body["messages"][0]["content"].as_str().unwrap_or_default()
                );
                Json(json!({"choices": [{"message": {"role": "assistant", "content": echo}}]}))
            }),
        );
        let base_url = spawn_server(router).await;
        let client = ChatClient::new(BackendConfig::new(base_url, "secret", "gpt-4o"));

        let reply = client.complete(&[ChatMessage::user("hello")]).await.unwrap();
        assert_eq!(reply, "Bearer secret|gpt-4o|false|hello");
    }

    #[tokio::test]
    async fn complete_treats_null_content_as_empty() {
        let router = axum::Router::new().route(
            "/chat/completions",
            post(|| async { Json(json!({"choices": [{"message": {"content": null}}]})) }),
        );
        let base_url = spawn_server(router).await;
        let client = ChatClient::new(BackendConfig::new(base_url, "secret", "m"));

        assert_eq!(client.complete(&[ChatMessage::user("x")]).await.unwrap(), "");
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_error() {
        let router = axum::Router::new()
            .route(
                "/chat/completions",
                post(|| async { "<html>gateway</html>" }),
            )
            .route("/models", get(|| async { "{\"data\": 42}" }));
        let base_url = spawn_server(router).await;
        let client = ChatClient::new(BackendConfig::new(base_url, "secret", "m"));

        let err = client.complete(&[ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)), "got {err:?}");
        let err = client.list_models().await.unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let router = axum::Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base_url = spawn_server(router).await;
        let client = ChatClient::new(BackendConfig::new(base_url, "secret", "m"));

        let err = client.open_stream(&[ChatMessage::user("x")]).await.err().unwrap();
        assert!(matches!(err, ClientError::Status { status: 401, .. }));
        assert_eq!(err.to_string(), "HTTP 401: bad key");
    }

    #[tokio::test]
    async fn open_stream_yields_raw_body() {
        let router = axum::Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], json!(true));
                assert_eq!(body["max_tokens"], json!(2000));
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n",
                )
                    .into_response()
            }),
        );
        let base_url = spawn_server(router).await;
        let client = ChatClient::new(BackendConfig::new(base_url, "secret", "m"));

        let mut stream = client.open_stream(&[ChatMessage::user("x")]).await.unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert!(String::from_utf8(body).unwrap().ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn list_models_filters_and_sorts() {
        let router = axum::Router::new().route(
            "/models",
            get(|| async {
                Json(json!({"data": [
                    {"id": "llama-3.1-8b"},
                    {"id": "text-embedding-3-small"},
                    {"id": "gpt-4o"},
                    {"id": "claude-3-5-sonnet"},
                    {"id": "gpt-3.5-turbo"}
                ]}))
            }),
        );
        let base_url = spawn_server(router).await;
        let client = ChatClient::new(BackendConfig::new(base_url, "secret", "m"));

        assert_eq!(
            client.list_models().await.unwrap(),
            vec!["claude-3-5-sonnet", "gpt-3.5-turbo", "gpt-4o", "llama-3.1-8b"]
        );
    }

    #[tokio::test]
    async fn empty_token_skips_model_requests() {
        let client = ChatClient::new(BackendConfig::new("http://127.0.0.1:9", "", "m"));
        assert!(client.list_models().await.unwrap().is_empty());
        assert!(!client.test_connection().await);
    }

    #[tokio::test]
    async fn test_connection_reports_status() {
        let router = axum::Router::new()
            .route("/ok/models", get(|| async { Json(json!({"data": []})) }))
            .route(
                "/denied/models",
                get(|| async { StatusCode::FORBIDDEN.into_response() }),
            );
        let base_url = spawn_server(router).await;

        let ok = ChatClient::new(BackendConfig::new(format!("{base_url}ok"), "t", "m"));
        let denied = ChatClient::new(BackendConfig::new(format!("{base_url}denied"), "t", "m"));
        assert!(ok.test_connection().await);
        assert!(!denied.test_connection().await);
    }
}
