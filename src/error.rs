//! Domain error taxonomy with stable wire codes.
//!
//! [`ServiceError`] is the closed set of errors a handler may surface to a
//! caller. Each kind maps to a fixed numeric code and a default description,
//! and translates into the uniform [`ErrorEnvelope`] wire shape. Anything
//! outside this set is coerced to the generic server error; its detail is
//! logged, never returned.

use serde::{Deserialize, Serialize};

/// The only error shape ever returned across the wire.
///
/// ```json
/// {
///   "code": 40004,
///   "description": "Not Found"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Stable numeric error code (see code ranges below).
    pub code: u32,
    /// Human-readable description.
    pub description: String,
}

/// Recognized domain error kinds.
///
/// # Error Code Ranges
///
/// | Kind             | Code  | Default description |
/// |------------------|-------|---------------------|
/// | Validation       | 40000 | Validation Error    |
/// | Unauthorized     | 40001 | Not Authenticated   |
/// | PermissionDenied | 40003 | Permission Denied   |
/// | NotFound         | 40004 | Not Found           |
/// | Timeout          | 50000 | Request Timeout     |
/// | Server           | 50000 | Server Error        |
///
/// `Timeout` shares the server-error code on the wire but stays a distinct
/// kind so library callers can still match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request failed validation.
    Validation,
    /// The caller is not authenticated.
    Unauthorized,
    /// The caller is authenticated but not allowed.
    PermissionDenied,
    /// The addressed entity does not exist.
    NotFound,
    /// The call did not complete before its deadline.
    Timeout,
    /// Generic server-side failure.
    Server,
}

impl ErrorKind {
    /// Returns the stable wire code for this kind.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Validation => 40000,
            Self::Unauthorized => 40001,
            Self::PermissionDenied => 40003,
            Self::NotFound => 40004,
            Self::Timeout | Self::Server => 50000,
        }
    }

    /// Returns the default description for this kind.
    #[must_use]
    pub const fn default_description(self) -> &'static str {
        match self {
            Self::Validation => "Validation Error",
            Self::Unauthorized => "Not Authenticated",
            Self::PermissionDenied => "Permission Denied",
            Self::NotFound => "Not Found",
            Self::Timeout => "Request Timeout",
            Self::Server => "Server Error",
        }
    }
}

/// A recognized domain error: a kind plus an overridable description.
///
/// Constructed with a default description via [`ServiceError::new`] or with
/// a caller-supplied one via [`ServiceError::with_description`]. Handlers
/// return these through `anyhow::Error`; the interceptor recovers them by
/// downcast and translates them into an [`ErrorEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{description}")]
pub struct ServiceError {
    kind: ErrorKind,
    description: String,
}

impl ServiceError {
    /// Creates an error of the given kind with its default description.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            description: kind.default_description().to_string(),
        }
    }

    /// Creates an error of the given kind with a custom description.
    #[must_use]
    pub fn with_description(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Validation error with a custom description.
    #[must_use]
    pub fn validation(description: impl Into<String>) -> Self {
        Self::with_description(ErrorKind::Validation, description)
    }

    /// Unauthenticated caller.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized)
    }

    /// Authenticated but not allowed.
    #[must_use]
    pub fn permission_denied() -> Self {
        Self::new(ErrorKind::PermissionDenied)
    }

    /// Entity not found.
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    /// Deadline elapsed before the call completed.
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Generic server error with the fixed public description.
    #[must_use]
    pub fn server() -> Self {
        Self::new(ErrorKind::Server)
    }

    /// Returns this error's kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns this error's stable wire code.
    #[must_use]
    pub const fn code(&self) -> u32 {
        self.kind.code()
    }

    /// Returns this error's description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Builds the wire envelope for this error.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code(),
            description: self.description.clone(),
        }
    }
}

impl From<&ServiceError> for ErrorEnvelope {
    fn from(err: &ServiceError) -> Self {
        err.envelope()
    }
}

/// Translates an arbitrary handler error into its wire envelope.
///
/// A recognized [`ServiceError`] keeps its code and description. Everything
/// else becomes the generic server-error envelope; no fragment of the
/// original error ever crosses the wire. The caller is responsible for
/// logging the unrecognized error's detail before discarding it.
#[must_use]
pub fn translate(err: &anyhow::Error) -> ErrorEnvelope {
    match err.downcast_ref::<ServiceError>() {
        Some(domain) => domain.envelope(),
        None => ServiceError::server().envelope(),
    }
}
