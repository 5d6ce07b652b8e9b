//! Error types and the JSON error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Machine-readable error codes surfaced at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// File extension not in the allowed set for its role.
    UnsupportedFormat,
    /// Request shape or parameter is invalid.
    Validation,
    /// Reference points nowhere.
    NotFound,
    /// Operation would violate a domain invariant.
    Precondition,
    /// Worker's lease has expired or was taken by another worker.
    LeaseLost,
    /// Optimistic-concurrency failure on an aggregate.
    Conflict,
    /// Request body exceeds the configured cap.
    PayloadTooLarge,
    /// Blob layer I/O problem.
    StorageIo,
    /// Content-addressed store observed a hash mismatch.
    Integrity,
    /// Downstream dependency unavailable.
    TransientDependency,
    /// Processor kind has no configured backend.
    NotAvailable,
    /// Unexpected internal failure, logged with full context.
    FatalInternal,
}

impl ErrorCode {
    /// Returns the wire representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Precondition => "PRECONDITION",
            ErrorCode::LeaseLost => "LEASE_LOST",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::StorageIo => "STORAGE_IO",
            ErrorCode::Integrity => "INTEGRITY",
            ErrorCode::TransientDependency => "TRANSIENT_DEPENDENCY",
            ErrorCode::NotAvailable => "NOT_AVAILABLE",
            ErrorCode::FatalInternal => "FATAL_INTERNAL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "UNSUPPORTED_FORMAT" => Some(ErrorCode::UnsupportedFormat),
            "VALIDATION" => Some(ErrorCode::Validation),
            "NOT_FOUND" => Some(ErrorCode::NotFound),
            "PRECONDITION" => Some(ErrorCode::Precondition),
            "LEASE_LOST" => Some(ErrorCode::LeaseLost),
            "CONFLICT" => Some(ErrorCode::Conflict),
            "PAYLOAD_TOO_LARGE" => Some(ErrorCode::PayloadTooLarge),
            "STORAGE_IO" => Some(ErrorCode::StorageIo),
            "INTEGRITY" => Some(ErrorCode::Integrity),
            "TRANSIENT_DEPENDENCY" => Some(ErrorCode::TransientDependency),
            "NOT_AVAILABLE" => Some(ErrorCode::NotAvailable),
            "FATAL_INTERNAL" => Some(ErrorCode::FatalInternal),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::UnsupportedFormat | ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Precondition | ErrorCode::LeaseLost | ErrorCode::Conflict => {
                StatusCode::CONFLICT
            }
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::StorageIo | ErrorCode::Integrity | ErrorCode::FatalInternal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::TransientDependency | ErrorCode::NotAvailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedFormat => {
                "The file extension is not supported for the declared asset kind."
            }
            ErrorCode::Validation => "The request is invalid.",
            ErrorCode::NotFound => "The specified resource does not exist.",
            ErrorCode::Precondition => "The operation would violate a domain invariant.",
            ErrorCode::LeaseLost => {
                "The lease on this job has expired or is held by another worker."
            }
            ErrorCode::Conflict => "The resource was modified concurrently. Retry the request.",
            ErrorCode::PayloadTooLarge => "The request payload exceeds the configured size cap.",
            ErrorCode::StorageIo => "The blob store encountered an I/O error. Retry the request.",
            ErrorCode::Integrity => "The stored content does not match its content hash.",
            ErrorCode::TransientDependency => "A downstream dependency is unavailable.",
            ErrorCode::NotAvailable => "No backend is configured for this processor kind.",
            ErrorCode::FatalInternal => "The server encountered an internal error.",
        }
    }
}

/// API error with a machine code and a human-readable message.
#[derive(Debug, Error)]
#[error("{}: {message}", code.as_str())]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    /// Creates an error with the code's default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
        }
    }

    /// Creates an error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::NotFound, what)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::Validation, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::Precondition, message)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::with_message(ErrorCode::StorageIo, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.code == ErrorCode::FatalInternal {
            tracing::error!(code = self.code.as_str(), message = %self.message, "internal error");
        }
        let status = self.code.status_code();
        let body = json!({
            "error": self.code.as_str(),
            "message": self.message,
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
