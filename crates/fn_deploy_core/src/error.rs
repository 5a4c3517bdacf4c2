use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors surfaced by the deployment pipeline.
///
/// `Clone` is required because errors travel through memoized deferred values
/// that may be read by several dependents.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeployError {
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    #[error("build failed with {} diagnostic(s): {}", .diagnostics.len(), .diagnostics.join("; "))]
    Build { diagnostics: Vec<String> },

    #[error("io error while {action} {path:?}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(
        "reconciliation of {resource} failed after {attempts} attempt(s) (last digest {digest}): {reason}"
    )]
    Reconciliation {
        resource: String,
        digest: String,
        attempts: u32,
        reason: String,
    },

    #[error("timed out after {waited:?} waiting for {resource} to converge")]
    ConvergenceTimeout { resource: String, waited: Duration },

    #[error("state store error: {message}")]
    State { message: String },

    #[error("background task failed: {message}")]
    Task { message: String },
}

impl DeployError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn io(action: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.as_ref().to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }

    /// Whether re-running the deployment may succeed without any change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(error) => error.is_transient(),
            Self::Reconciliation { .. } | Self::ConvergenceTimeout { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Conflict, update in progress, throttling or a dropped connection.
    Transient,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed ({}): {message}", .code.as_deref().unwrap_or("no error code"))]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub operation: &'static str,
    pub code: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            operation,
            code: None,
            message: message.into(),
        }
    }

    pub fn fatal(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Fatal,
            operation,
            code: None,
            message: message.into(),
        }
    }

    /// Builds an error from a provider error code, classifying it on the way.
    pub fn from_code(operation: &'static str, code: &str, message: impl Into<String>) -> Self {
        Self {
            kind: classify_error_code(code),
            operation,
            code: Some(code.to_string()),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}

const TRANSIENT_ERROR_CODES: &[&str] = &[
    "ResourceConflictException",
    "ResourceNotReadyException",
    "TooManyRequestsException",
    "ThrottlingException",
    "Throttling",
    "ThrottledException",
    "RequestLimitExceeded",
    "EC2ThrottledException",
    "ServiceException",
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "InternalError",
    "InternalFailure",
    "SlowDown",
    "RequestTimeout",
];

pub fn classify_error_code(code: &str) -> ProviderErrorKind {
    if TRANSIENT_ERROR_CODES.contains(&code.trim()) {
        ProviderErrorKind::Transient
    } else {
        ProviderErrorKind::Fatal
    }
}
