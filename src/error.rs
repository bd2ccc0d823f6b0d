use std::time::Duration;

use thiserror::Error;

/// Failure talking to the remote category API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("api error {code}: {info}")]
    Remote { code: String, info: String },

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("outbound limiter closed")]
    LimiterClosed,

    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ApiError>,
    },
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Malformed(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Pipeline-level failure. Per-item problems never surface here.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("root category {category} could not be listed: {source}")]
    RootUnavailable {
        category: String,
        #[source]
        source: ApiError,
    },

    #[error("pipeline did not finish within {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("crawler worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}
