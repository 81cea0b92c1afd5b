//! Unified error types for livemock.
//!
//! Defines [`LivemockError`] (the main crate error enum) and
//! [`ValidationError`] for endpoint definition failures. Both use
//! `thiserror` for `Display` and `Error` derives. The expression and
//! template layers carry their own error types
//! ([`ExprError`](crate::expr::ExprError),
//! [`DirectiveError`](crate::template::DirectiveError)) because their
//! failures are logged and absorbed rather than propagated.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationError {
    pub endpoint: String,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "  endpoint {}: {}: {}",
            self.endpoint, self.field, self.message
        )?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        let _ = write!(buf, "{e}");
    }
    buf
}

/// Why a pattern could not be inserted into the route trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The same method and pattern are already registered.
    Duplicate,
    /// A parameter or wildcard disagrees with one already at the same position.
    Wildcard,
    /// The pattern itself is malformed (e.g. a `*name` that is not the last segment).
    Syntax,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Duplicate => "duplicate route",
            Self::Wildcard => "conflicting parameter at the same position",
            Self::Syntax => "invalid route pattern",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LivemockError {
    #[error("Route conflict for {method} {path}: {reason}")]
    RouteConflict {
        method: String,
        path: String,
        reason: ConflictReason,
    },

    #[error("No backends available for {endpoint}: {hint}")]
    BackendUnavailable { endpoint: String, hint: String },

    #[error("Store error ({backend}): {source}")]
    Store {
        backend: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid endpoint definition:\n{}", format_errors(.errors))]
    InvalidDefinition { errors: Vec<ValidationError> },

    #[error("Endpoint {0} not found")]
    EndpointNotFound(u64),

    #[error("Definitions file not found: {}", path.display())]
    DefinitionsFileNotFound { path: PathBuf },

    #[error("Definitions parse error in {path}:\n  {source}")]
    DefinitionsParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported store format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(hyper::StatusCode),
}

impl LivemockError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteConflict { .. } => StatusCode::CONFLICT,
            Self::InvalidDefinition { .. } | Self::DefinitionsParse { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::EndpointNotFound(_) | Self::DefinitionsFileNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::BackendUnavailable { .. } | Self::HttpRequest { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LivemockError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = match &self {
            Self::InvalidDefinition { errors } => serde_json::json!({
                "error": "invalid endpoint definition",
                "details": errors,
            }),
            other => serde_json::json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
