//! Gateway error type and its HTTP status mapping.
use http::StatusCode;
use std::fmt;

/// Error raised while handling an HTTP request.
///
/// Every error carries a message and maps to exactly one HTTP status via
/// [`status`](HttpError::status). Engines catch these internally and render
/// them through the error-page path (page engine) or the JSON error
/// envelope (REST engine).
pub struct HttpError {
    kind: Kind,
    message: String,
}

enum Kind {
    /// Malformed request: unknown page, bad parameter, over-multivalued.
    Incorrect,
    /// Authentication was presented but is invalid.
    InvalidAuth,
    /// Authenticated but not allowed.
    Forbidden,
    /// Entity or page not found.
    NotFound,
    /// No handler accepts this method on this URI.
    MethodNotAllowed,
    /// The body decoder refused the payload.
    NotAcceptable,
    /// Unhandled internal failure.
    Internal,
}

impl HttpError {
    fn new(kind: Kind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn incorrect(message: impl Into<String>) -> Self {
        Self::new(Kind::Incorrect, message)
    }

    pub fn invalid_auth(message: impl Into<String>) -> Self {
        Self::new(Kind::InvalidAuth, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(Kind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Kind::NotFound, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(Kind::MethodNotAllowed, message)
    }

    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self::new(Kind::NotAcceptable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Kind::Internal, message)
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self.kind {
            Kind::Incorrect => StatusCode::BAD_REQUEST,
            Kind::InvalidAuth => StatusCode::UNAUTHORIZED,
            Kind::Forbidden => StatusCode::FORBIDDEN,
            Kind::NotFound => StatusCode::NOT_FOUND,
            Kind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Kind::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Kind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// ===== Conversions =====

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(Kind::Incorrect, err.to_string())
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        Self::new(Kind::Internal, err.to_string())
    }
}

impl From<crate::multipart::MultipartError> for HttpError {
    fn from(err: crate::multipart::MultipartError) -> Self {
        let kind = if err.is_internal() { Kind::Internal } else { Kind::NotAcceptable };
        Self::new(kind, err.to_string())
    }
}

// ===== Std =====

impl std::error::Error for HttpError {}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("status", &self.status())
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status(), self.message)
    }
}
