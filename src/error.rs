use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("API token is required")]
    MissingToken,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Network(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No choices returned")]
    EmptyResponse,
}

pub type ClientResult<T> = Result<T, ClientError>;
