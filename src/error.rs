use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Errors raised inside a single provider branch.
///
/// None of these ever reach the caller of the fan-out: the branch logs them
/// and reports an empty image reference for its provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("non-success status {status}: {body}")]
    NonSuccessStatus { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("job {job_id} still pending after {attempts} status checks")]
    PollTimeout { job_id: String, attempts: u32 },

    #[error("unexpected initial job status: {0}")]
    UnexpectedInitialStatus(String),

    #[error("job {0} failed on the provider side")]
    JobFailed(String),

    #[error("failed to persist image: {0}")]
    Persist(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// History store failures. Logged by the recorder, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("history read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("history serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to load histories: {0}")]
    History(#[from] HistoryError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::History(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");
        let status = self.status_code();
        (
            status,
            Json(ErrorResponse {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
