use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Failures talking to the chat-completion API.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model API key not configured")]
    NotConfigured,
    #[error("model request failed: {0}")]
    Network(String),
    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("model response parse failed: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("{0}")]
    Execution(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stored value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid document name '{0}'")]
    InvalidName(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PORT must be a valid port number, got '{0}'")]
    InvalidPort(String),
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by HTTP handlers, rendered with the `{success, error}` envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidName(name) => {
                Self::BadRequest(format!("invalid document name '{name}'"))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Internal(msg) => error!(message = %msg, "API error"),
            ApiError::Unauthorized(msg) => warn!(message = %msg, "unauthorized request"),
            _ => debug!(message = %self, "client error"),
        }
        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}
