//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Status codes a [`ResourceException`] may carry.
pub const ALLOWED_STATUS_CODES: &[u16] = &[304, 400, 401, 403, 404, 422, 500];

/// Configuration load failures. Always fatal: the registry is never partially built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("configuration must specify \"{0}\" directive")]
    MissingDirective(String),
    #[error("configuration must specify \"class\" directive for {0:?}")]
    MissingClass(String),
    #[error("unknown resource module '{0}'")]
    UnknownModule(String),
    #[error("could not find resource class {0:?}")]
    UnknownClass(String),
    #[error("unresolved symbol '{symbol}' in expression {expression:?}")]
    UnresolvedSymbol { symbol: String, expression: String },
    #[error("name '{0}' conflicts with an existing name in the resolver namespace")]
    NameConflict(String),
    #[error("could not parse {source_text:?} as an expression: {message}")]
    Expression { source_text: String, message: String },
    #[error("{context}: {message}")]
    Malformed { context: String, message: String },
    #[error("the directives {directives} are unrecognized in {context} context")]
    UnrecognizedDirectives { context: String, directives: String },
    #[error("the configuration for {0} lists duplicate attr keys")]
    DuplicateAttributes(String),
    #[error("the configuration for {entity} lists {list} that are not included in the attr list: {fields}")]
    UnknownFields {
        entity: String,
        list: &'static str,
        fields: String,
    },
    #[error("{0}")]
    ForeignKey(String),
    #[error("config load: {0}")]
    Load(String),
}

impl ConfigError {
    pub(crate) fn malformed(context: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Malformed {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Request-time failure carrying `(statusCode, errorId, message)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status_code} {error_id}: {message}")]
pub struct ResourceException {
    status_code: u16,
    error_id: String,
    message: String,
}

impl ResourceException {
    /// # Panics
    ///
    /// Panics when `status_code` is not one of [`ALLOWED_STATUS_CODES`]; passing any other
    /// code is a programming error.
    pub fn new(status_code: u16, error_id: impl Into<String>, message: impl Into<String>) -> Self {
        assert!(
            ALLOWED_STATUS_CODES.contains(&status_code),
            "{} is not a valid status code",
            status_code
        );
        let exc = ResourceException {
            status_code,
            error_id: error_id.into(),
            message: message.into(),
        };
        tracing::debug!(status = exc.status_code, error_id = %exc.error_id, "{}", exc.message);
        exc
    }

    pub fn bad_request(error_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(400, error_id, message)
    }

    pub fn not_found(error_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(404, error_id, message)
    }

    pub fn internal(error_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(500, error_id, message)
    }

    /// 400 `bad_<field>`.
    pub fn bad_field(field: &str, message: impl Into<String>) -> Self {
        Self::new(400, format!("bad_{}", field), message)
    }

    /// 304: the request would change nothing.
    pub fn not_modified() -> Self {
        Self::new(304, "not_modified", "No data has been modified.")
    }

    pub fn unauthorized_caller() -> Self {
        Self::new(
            403,
            "unauthorized_caller",
            "You do not have sufficient privileges to perform this action.",
        )
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn error_id(&self) -> &str {
        &self.error_id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Appends a sentence to the message (e.g. "No data has been modified.").
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.message = format!("{} {}", self.message.trim(), suffix);
        self
    }
}

impl From<ConfigError> for ResourceException {
    fn from(e: ConfigError) -> Self {
        ResourceException::internal("config_error", e.to_string())
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "errorID")]
    pub error_id: String,
    pub message: String,
}

impl IntoResponse for ResourceException {
    fn into_response(self) -> Response {
        if self.status_code == 304 {
            return StatusCode::NOT_MODIFIED.into_response();
        }
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            status_code: self.status_code,
            error_id: self.error_id,
            message: self.message,
        };
        (status, Json(body)).into_response()
    }
}
