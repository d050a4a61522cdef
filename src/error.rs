//! Error types for the pool core
//!
//! One crate-wide [`Error`] built from per-concern subtype enums via
//! `thiserror`. Share rejections carry the wire code the stratum dialect
//! expects, so the session layer never has to re-derive it.

use std::time::Duration;
use thiserror::Error;

/// Configuration error subtypes
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} (expected: {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Parse error in {file}: {message}")]
    ParseError { file: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationError { message: String },
}

/// Errors talking to the upstream daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Daemon unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("RPC {method} failed: code {code} - {message}")]
    RpcFailure {
        method: String,
        code: i64,
        message: String,
    },

    #[error("RPC {method} returned a malformed response: {message}")]
    BadResponse { method: String, message: String },

    #[error("Block rejected by daemon: {status}")]
    SubmitRejected { status: String },

    #[error("Template stream error: {message}")]
    StreamError { message: String },
}

/// Stratum protocol and session errors
#[derive(Error, Debug)]
pub enum StratumError {
    #[error("Failed to bind {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Session {connection_id} is not authorized")]
    Unauthorized { connection_id: String },

    #[error("Invalid wallet address: {address}")]
    InvalidAddress { address: String },

    #[error("invalid payment id")]
    InvalidPaymentId,

    #[error("Missing parameter: {param}")]
    MissingParam { param: String },

    #[error("Unsupported request {method}")]
    UnsupportedMethod { method: String },

    #[error("Session mailbox closed: {connection_id}")]
    MailboxClosed { connection_id: String },
}

/// Share rejection reasons, with their wire error codes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShareError {
    #[error("job not found")]
    UnknownJob,

    #[error("stale job")]
    StaleTemplate,

    #[error("duplicate share")]
    DuplicateNonce,

    #[error("low difficulty share: {actual} < {required}")]
    LowDifficulty { actual: u64, required: u64 },

    #[error("bad hash")]
    BadHash,

    #[error("malformed nonce: {nonce}")]
    MalformedNonce { nonce: String },

    #[error("malformed result hash: {result}")]
    MalformedResult { result: String },
}

impl ShareError {
    /// Wire error code for the stratum dialect.
    pub fn wire_code(&self) -> i32 {
        match self {
            ShareError::UnknownJob | ShareError::StaleTemplate => 21,
            ShareError::DuplicateNonce => 22,
            ShareError::LowDifficulty { .. } => 23,
            ShareError::BadHash => 24,
            ShareError::MalformedNonce { .. } | ShareError::MalformedResult { .. } => -1,
        }
    }
}

/// Proof-of-work backend errors
#[derive(Error, Debug)]
pub enum PowError {
    #[error("PoW variant {variant} is not supported by this backend")]
    UnsupportedVariant { variant: String },

    #[error("Template has no seed hash but the variant requires one")]
    MissingSeed,

    #[error("No PoW variant registered for {family} major version {major_version}")]
    UnknownVersion { family: String, major_version: u8 },

    #[error("PoW backend error: {message}")]
    Backend { message: String },
}

/// Main error type for the pool core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("Stratum error: {0}")]
    Stratum(#[from] StratumError),

    #[error("Share rejected: {0}")]
    Share(#[from] ShareError),

    #[error("PoW error: {0}")]
    Pow(#[from] PowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Operation timed out after {timeout:?}: {operation}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Internal error in {context}: {message}")]
    Internal { context: String, message: String },
}

/// Result type alias for the pool core
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a generic configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::ValidationError {
            message: msg.into(),
        })
    }

    /// Create an invalid-value configuration error
    pub fn config_invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::Config(ConfigError::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        })
    }

    /// Create a daemon-unreachable error
    pub fn daemon_unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Daemon(DaemonError::Unreachable {
            url: url.into(),
            message: message.into(),
        })
    }

    /// Create a malformed-response daemon error
    pub fn daemon_bad_response(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Daemon(DaemonError::BadResponse {
            method: method.into(),
            message: message.into(),
        })
    }

    /// Create a PoW backend error
    pub fn pow_backend(message: impl Into<String>) -> Self {
        Self::Pow(PowError::Backend {
            message: message.into(),
        })
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create an internal error
    pub fn internal(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Check if this error should trigger a retry against the daemon.
    pub fn should_retry(&self) -> bool {
        match self {
            Error::Daemon(DaemonError::Unreachable { .. })
            | Error::Daemon(DaemonError::StreamError { .. })
            | Error::Timeout { .. } => true,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Get the error category for telemetry and logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration",
            Error::Daemon(_) => "daemon",
            Error::Stratum(_) => "stratum",
            Error::Share(_) => "share",
            Error::Pow(_) => "pow",
            Error::Json(_) | Error::Yaml(_) => "serialization",
            Error::Io(_) => "io",
            Error::Http(_) => "http",
            Error::Timeout { .. } => "timeout",
            Error::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_error_wire_codes() {
        assert_eq!(ShareError::UnknownJob.wire_code(), 21);
        assert_eq!(ShareError::StaleTemplate.wire_code(), 21);
        assert_eq!(ShareError::DuplicateNonce.wire_code(), 22);
        assert_eq!(
            ShareError::LowDifficulty {
                actual: 10,
                required: 100
            }
            .wire_code(),
            23
        );
        assert_eq!(ShareError::BadHash.wire_code(), 24);
        assert_eq!(
            ShareError::MalformedNonce { nonce: "zz".into() }.wire_code(),
            -1
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::config("missing field");
        assert!(err.to_string().contains("Validation failed: missing field"));

        let err = Error::daemon_unreachable("http://localhost:18081", "connection refused");
        assert!(err.to_string().contains("Daemon unreachable"));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::config("x").category(), "configuration");
        assert_eq!(Error::daemon_unreachable("u", "m").category(), "daemon");
        assert_eq!(Error::from(ShareError::BadHash).category(), "share");
    }

    #[test]
    fn test_should_retry() {
        assert!(Error::daemon_unreachable("u", "m").should_retry());
        assert!(Error::timeout("get_block_template", Duration::from_secs(10)).should_retry());
        assert!(!Error::config("bad").should_retry());
        assert!(!Error::from(ShareError::BadHash).should_retry());
    }

    #[test]
    fn test_error_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let json_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
