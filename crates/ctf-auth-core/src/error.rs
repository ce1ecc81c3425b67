use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Config
    #[error("config not found (searched: {searched:?})")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("config parse error in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    // Store
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Request shape
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Clients and grants
    #[error("unknown client")]
    UnknownClient,

    #[error("invalid client credentials")]
    InvalidClient,

    #[error("redirect_uri does not match a registered URI")]
    RedirectMismatch,

    #[error("invalid grant")]
    InvalidGrant,

    #[error("code_verifier does not satisfy the stored code_challenge")]
    PkceMismatch,

    #[error("invalid or expired token")]
    InvalidToken,

    // Access
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("stage {required} must be completed first")]
    StageLocked { required: u8 },

    // Query layer
    #[error("query syntax error: {0}")]
    QuerySyntax(String),

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Self::Store(_) | Self::Serialization(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            Self::InvalidRequest(_) | Self::RedirectMismatch | Self::QuerySyntax(_) => {
                StatusCode::BAD_REQUEST
            }

            Self::UnknownClient
            | Self::InvalidClient
            | Self::InvalidGrant
            | Self::PkceMismatch
            | Self::InvalidToken => StatusCode::UNAUTHORIZED,

            Self::Forbidden(_) | Self::StageLocked { .. } => StatusCode::FORBIDDEN,

            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    /// User-facing error code (short, stable string).
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::ConfigParse { .. } => "config_parse_error",
            Self::Config(_) => "config_error",
            Self::Store(_) | Self::Serialization(_) | Self::Internal(_) => "internal_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnknownClient => "unknown_client",
            Self::InvalidClient => "invalid_client",
            Self::RedirectMismatch => "redirect_mismatch",
            Self::InvalidGrant => "invalid_grant",
            Self::PkceMismatch => "pkce_mismatch",
            Self::InvalidToken => "invalid_token",
            Self::Forbidden(_) => "forbidden",
            Self::StageLocked { .. } => "stage_locked",
            Self::QuerySyntax(_) => "query_syntax_error",
            Self::NotFound => "not_found",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log internal errors, don't expose details to client
        let detail = if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
            None
        } else {
            Some(self.to_string())
        };

        let body = ErrorBody {
            error: self.error_code().to_string(),
            detail,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
