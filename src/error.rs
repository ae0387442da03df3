//! Error taxonomy for the relay pipeline
//!
//! - [`ClientError`]: anything a chain client reports
//! - [`SubscriptionError`]: event stream setup or maintenance failed (drives listener restart)
//! - [`ConnectivityError`]: startup liveness check failed (drives startup retry)
//! - [`SubmissionFailure`]: a claim call failed, classified retryable or not
//!
//! A deposit that the router ignores is not an error and has no type here.

use std::fmt;

use thiserror::Error;

/// Error reported by a chain client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode event: {0}")]
    Decode(String),
    #[error("nonce contention: {0}")]
    Nonce(String),
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("event stream closed")]
    StreamClosed,
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl ClientError {
    /// Build a typed error from a free-form node error message
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        // A revert reason is free text and may mention timeouts or networks
        if lower.contains("revert") || lower.contains("insufficient funds") || lower.contains("out of gas") {
            return ClientError::Reverted(message);
        }

        if lower.contains("timeout") || lower.contains("timed out") {
            return ClientError::Timeout(message);
        }

        if lower.contains("connection")
            || lower.contains("network")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("503")
            || lower.contains("502")
            || lower.contains("temporarily unavailable")
        {
            return ClientError::Transport(message);
        }

        if lower.contains("nonce")
            || lower.contains("underpriced")
            || lower.contains("replacement transaction")
            || lower.contains("already known")
        {
            return ClientError::Nonce(message);
        }

        if lower.contains("invalid argument")
            || lower.contains("invalid parameters")
            || lower.contains("abi")
            || lower.contains("encoding")
        {
            return ClientError::InvalidArgument(message);
        }

        ClientError::Rpc(message)
    }
}

/// Event stream setup or maintenance failure
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    #[error("failed to subscribe to {event} on {chain}: {source}")]
    Subscribe {
        chain: String,
        event: String,
        #[source]
        source: ClientError,
    },
    #[error("event stream on {chain} failed: {source}")]
    Stream {
        chain: String,
        #[source]
        source: ClientError,
    },
    #[error("malformed deposit event on {chain}: {reason}")]
    Decode { chain: String, reason: String },
    #[error("event stream on {chain} closed by the client")]
    Closed { chain: String },
    #[error("listener for {chain} panicked: {message}")]
    Panicked { chain: String, message: String },
}

/// Startup liveness check failure
#[derive(Debug, Clone, Error)]
#[error("connectivity check failed for {chain}: {source}")]
pub struct ConnectivityError {
    pub chain: String,
    #[source]
    pub source: ClientError,
}

/// Reason a claim call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionErrorKind {
    Timeout,
    Network,
    NonceContention,
    Reverted,
    InvalidArgument,
    Panicked,
    Unknown,
}

impl SubmissionErrorKind {
    /// Only transport-level problems are worth resending
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmissionErrorKind::Timeout
                | SubmissionErrorKind::Network
                | SubmissionErrorKind::NonceContention
                | SubmissionErrorKind::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionErrorKind::Timeout => "timeout",
            SubmissionErrorKind::Network => "network",
            SubmissionErrorKind::NonceContention => "nonce_contention",
            SubmissionErrorKind::Reverted => "reverted",
            SubmissionErrorKind::InvalidArgument => "invalid_argument",
            SubmissionErrorKind::Panicked => "panicked",
            SubmissionErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SubmissionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified claim failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (retryable: {retryable}): {message}")]
pub struct SubmissionFailure {
    pub kind: SubmissionErrorKind,
    pub retryable: bool,
    pub message: String,
}

impl SubmissionFailure {
    pub fn new(kind: SubmissionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            message: message.into(),
        }
    }

    /// Panics inside a chain client are never retried automatically
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(SubmissionErrorKind::Panicked, message)
    }
}

impl From<&ClientError> for SubmissionFailure {
    fn from(error: &ClientError) -> Self {
        let kind = match error {
            ClientError::Timeout(_) => SubmissionErrorKind::Timeout,
            ClientError::Transport(_) | ClientError::StreamClosed => SubmissionErrorKind::Network,
            ClientError::Nonce(_) => SubmissionErrorKind::NonceContention,
            ClientError::Reverted(_) => SubmissionErrorKind::Reverted,
            ClientError::InvalidArgument(_) | ClientError::Decode(_) => {
                SubmissionErrorKind::InvalidArgument
            }
            ClientError::Rpc(_) => SubmissionErrorKind::Unknown,
        };
        SubmissionFailure::new(kind, error.to_string())
    }
}

/// Render a panic payload for logging
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(matches!(
            ClientError::from_message("connection timeout"),
            ClientError::Timeout(_)
        ));
        assert!(matches!(
            ClientError::from_message("error sending request: connection refused"),
            ClientError::Transport(_)
        ));
        assert!(matches!(
            ClientError::from_message("replacement transaction underpriced"),
            ClientError::Nonce(_)
        ));
        assert!(matches!(
            ClientError::from_message("nonce too low"),
            ClientError::Nonce(_)
        ));
        assert!(matches!(
            ClientError::from_message("execution reverted: already claimed"),
            ClientError::Reverted(_)
        ));
        assert!(matches!(
            ClientError::from_message("execution reverted: claim window timeout"),
            ClientError::Reverted(_)
        ));
        assert!(matches!(
            ClientError::from_message("execution reverted: Bridge: network not supported"),
            ClientError::Reverted(_)
        ));
        assert!(matches!(
            ClientError::from_message("execution reverted: nonce already used"),
            ClientError::Reverted(_)
        ));
        assert!(matches!(
            ClientError::from_message("insufficient funds for gas * price + value: connection pool"),
            ClientError::Reverted(_)
        ));
        assert!(matches!(
            ClientError::from_message("something odd"),
            ClientError::Rpc(_)
        ));
    }

    #[test]
    fn test_submission_failure_retryable_split() {
        let retryable = [
            ClientError::Timeout("t".into()),
            ClientError::Transport("t".into()),
            ClientError::Nonce("n".into()),
            ClientError::Rpc("?".into()),
        ];
        for error in &retryable {
            assert!(SubmissionFailure::from(error).retryable, "{error}");
        }

        let terminal = [
            ClientError::Reverted("r".into()),
            ClientError::InvalidArgument("i".into()),
        ];
        for error in &terminal {
            assert!(!SubmissionFailure::from(error).retryable, "{error}");
        }
    }

    #[test]
    fn test_revert_mentioning_timeout_is_terminal() {
        let error = ClientError::from_message("execution reverted: claim window timeout");
        let failure = SubmissionFailure::from(&error);
        assert_eq!(failure.kind, SubmissionErrorKind::Reverted);
        assert!(!failure.retryable);
    }

    #[test]
    fn test_panicked_is_terminal() {
        let failure = SubmissionFailure::panicked("boom");
        assert_eq!(failure.kind, SubmissionErrorKind::Panicked);
        assert!(!failure.retryable);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
