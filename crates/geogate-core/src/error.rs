use thiserror::Error;

/// Canonical error type for collaborator and infrastructure failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Collaborator answered with something this crate cannot interpret.
    #[error("{collaborator} returned an invalid response: {message}")]
    InvalidResponse {
        /// Collaborator name (e.g. `"catalog"`).
        collaborator: &'static str,
        /// Human-readable details.
        message: String,
    },

    /// Collaborator could not be reached or failed the call.
    #[error("{collaborator} call failed: {message}")]
    Collaborator {
        /// Collaborator name (e.g. `"acl"`).
        collaborator: &'static str,
        /// Human-readable details.
        message: String,
    },

    /// Collaborator did not answer within the configured bound.
    #[error("{collaborator} call timed out after {timeout_ms}ms")]
    Timeout {
        /// Collaborator name.
        collaborator: &'static str,
        /// Bound that elapsed.
        timeout_ms: u64,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),
}

impl CoreError {
    /// Creates an `InvalidResponse` variant.
    #[must_use]
    pub fn invalid_response(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            collaborator,
            message: message.into(),
        }
    }

    /// Creates a `Collaborator` variant.
    #[must_use]
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() {
            Self::DeserializationError(err.to_string())
        } else {
            Self::SerializationError(err.to_string())
        }
    }
}

/// Convenient result alias for collaborator operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Machine-readable codes carried in outbound error bodies.
pub mod codes {
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const NOT_AUTHORIZED: &str = "NOT_AUTHORIZED";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const MISSING_CREDENTIAL: &str = "MISSING_CREDENTIAL";
    pub const RESOURCE_OPEN_TOKEN_SECURE: &str = "RESOURCE_OPEN_TOKEN_SECURE";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const DATA_USAGE_LIMIT_EXCEEDED: &str = "DATA_USAGE_LIMIT_EXCEEDED";
    pub const API_CALLS_LIMIT_EXCEEDED: &str = "API_CALLS_LIMIT_EXCEEDED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Terminal outcome of a pipeline stage that refuses a request.
///
/// Every variant maps to exactly one HTTP status and carries the
/// `{code, description}` pair written to the response body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    /// Malformed identifier, limit or query parameter.
    #[error("bad request ({code}): {description}")]
    BadRequest {
        code: &'static str,
        description: String,
    },

    /// Identifier could not be resolved to a resource.
    #[error("not found ({code}): {description}")]
    NotFound {
        code: &'static str,
        description: String,
    },

    /// Credential is missing, invalid or scoped to something else.
    #[error("not authorized ({code}): {description}")]
    NotAuthorized {
        code: &'static str,
        description: String,
    },

    /// Ownership, ACL, feature or bounding-box constraint refused the request.
    #[error("forbidden ({code}): {description}")]
    Forbidden {
        code: &'static str,
        description: String,
    },

    /// A usage quota was exceeded.
    #[error("too many requests ({code}): {description}")]
    TooManyRequests {
        code: &'static str,
        description: String,
    },

    /// A collaborator failed or something unexpected happened.
    #[error("internal error ({code}): {description}")]
    Internal {
        code: &'static str,
        description: String,
    },
}

impl GateError {
    #[must_use]
    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::BadRequest {
            code: codes::BAD_REQUEST,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn not_found(description: impl Into<String>) -> Self {
        Self::NotFound {
            code: codes::NOT_FOUND,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn not_authorized(description: impl Into<String>) -> Self {
        Self::NotAuthorized {
            code: codes::NOT_AUTHORIZED,
            description: description.into(),
        }
    }

    /// 401 raised while resolving or verifying a credential.
    #[must_use]
    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::NotAuthorized {
            code: codes::INVALID_TOKEN,
            description: description.into(),
        }
    }

    /// 401 raised when no credential accompanies the request.
    #[must_use]
    pub fn missing_credential() -> Self {
        Self::NotAuthorized {
            code: codes::MISSING_CREDENTIAL,
            description: "credential is required for this resource".to_string(),
        }
    }

    #[must_use]
    pub fn forbidden(description: impl Into<String>) -> Self {
        Self::Forbidden {
            code: codes::FORBIDDEN,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn too_many_requests(code: &'static str, description: impl Into<String>) -> Self {
        Self::TooManyRequests {
            code,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn internal(description: impl Into<String>) -> Self {
        Self::Internal {
            code: codes::INTERNAL_ERROR,
            description: description.into(),
        }
    }

    /// HTTP status code for this outcome.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::NotAuthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::TooManyRequests { .. } => 429,
            Self::Internal { .. } => 500,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. }
            | Self::NotFound { code, .. }
            | Self::NotAuthorized { code, .. }
            | Self::Forbidden { code, .. }
            | Self::TooManyRequests { code, .. }
            | Self::Internal { code, .. } => code,
        }
    }

    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::BadRequest { description, .. }
            | Self::NotFound { description, .. }
            | Self::NotAuthorized { description, .. }
            | Self::Forbidden { description, .. }
            | Self::TooManyRequests { description, .. }
            | Self::Internal { description, .. } => description,
        }
    }
}

impl From<CoreError> for GateError {
    fn from(err: CoreError) -> Self {
        tracing::error!(error = %err, "collaborator failure");
        Self::internal("internal server error")
    }
}

/// Result alias for pipeline stages.
pub type GateResult<T> = Result<T, GateError>;
