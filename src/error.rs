//! Error taxonomy shared by every subsystem.
//!
//! Library operations return `Result<T, AgentError>`. The binary edge
//! (startup, config loading) works with `anyhow::Result`.

use serde::{Deserialize, Serialize};

/// Every failure an agent operation can surface to its caller.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AgentError {
    /// A request carried a value that cannot describe a valid job.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A message is structurally unusable (e.g. a required header is missing).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Resolution could not produce a destination for a forwarded message.
    #[error("destination not found: {0}")]
    DestinationNotFound(String),

    /// The OS refused to start the copier process.
    #[error("failed to spawn copier ({kind}): {message}")]
    Spawn { kind: String, message: String },

    /// Local filesystem failure outside the copier (temp dir creation etc.).
    #[error("io error: {0}")]
    Io(String),

    /// The copier exceeded its deadline.
    #[error("copier timed out")]
    CopierTimeout,

    /// The copier was explicitly aborted.
    #[error("operation canceled")]
    OperationCanceled,

    /// The copier runtime was disabled while the process was running.
    #[error("copier runtime disabled (not primary)")]
    NotPrimary,

    /// Transfer failure reported by the copier through its error-details file.
    #[error("copier failed with code {code}: {message}")]
    Copier { code: i32, message: String },

    /// The copier exited with failure but left no usable error details.
    #[error("copier exited with {exit_code} without usable error details: {details}")]
    CopierUnexpected { exit_code: i32, details: String },

    /// Opaque failure from the inter-node or intra-process transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remaining time budget ran out before the next hop.
    #[error("operation timed out")]
    Timeout,

    /// The target component is shut down.
    #[error("object closed")]
    ObjectClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Stable identifier carried in failure replies.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::InvalidArgument(_) => "InvalidArgument",
            AgentError::InvalidMessage(_) => "InvalidMessage",
            AgentError::DestinationNotFound(_) => "DestinationNotFound",
            AgentError::Spawn { .. } => "SpawnFailed",
            AgentError::Io(_) => "IoError",
            AgentError::CopierTimeout => "CopierTimeout",
            AgentError::OperationCanceled => "OperationCanceled",
            AgentError::NotPrimary => "NotPrimary",
            AgentError::Copier { .. } => "CopierError",
            AgentError::CopierUnexpected { .. } => "CopierUnexpectedError",
            AgentError::Transport(_) => "TransportError",
            AgentError::Timeout => "Timeout",
            AgentError::ObjectClosed => "ObjectClosed",
            AgentError::Internal(_) => "InternalError",
        }
    }

    pub fn spawn(err: &std::io::Error) -> Self {
        AgentError::Spawn {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }

    /// Wire form of this error. Every variant survives
    /// [`AgentError::from_details`] unchanged.
    pub fn to_details(&self) -> ErrorDetails {
        let mut details = ErrorDetails {
            kind: self.code().to_string(),
            copier_code: None,
            exit_code: None,
            spawn_kind: None,
            message: String::new(),
        };

        match self {
            AgentError::InvalidArgument(message)
            | AgentError::InvalidMessage(message)
            | AgentError::DestinationNotFound(message)
            | AgentError::Io(message)
            | AgentError::Transport(message)
            | AgentError::Internal(message) => details.message = message.clone(),
            AgentError::Spawn { kind, message } => {
                details.spawn_kind = Some(kind.clone());
                details.message = message.clone();
            }
            AgentError::Copier { code, message } => {
                details.copier_code = Some(*code);
                details.message = message.clone();
            }
            AgentError::CopierUnexpected {
                exit_code,
                details: raw,
            } => {
                details.exit_code = Some(*exit_code);
                details.message = raw.clone();
            }
            AgentError::CopierTimeout
            | AgentError::OperationCanceled
            | AgentError::NotPrimary
            | AgentError::Timeout
            | AgentError::ObjectClosed => details.message = self.to_string(),
        }

        details
    }

    /// Rebuilds an error from the details carried in a remote failure reply.
    pub fn from_details(details: &ErrorDetails) -> Self {
        let message = details.message.clone();

        match details.kind.as_str() {
            "InvalidArgument" => AgentError::InvalidArgument(message),
            "InvalidMessage" => AgentError::InvalidMessage(message),
            "DestinationNotFound" => AgentError::DestinationNotFound(message),
            "SpawnFailed" => AgentError::Spawn {
                kind: details.spawn_kind.clone().unwrap_or_default(),
                message,
            },
            "IoError" => AgentError::Io(message),
            "CopierTimeout" => AgentError::CopierTimeout,
            "OperationCanceled" => AgentError::OperationCanceled,
            "NotPrimary" => AgentError::NotPrimary,
            "CopierError" => match details.copier_code {
                Some(code) => AgentError::Copier { code, message },
                None => AgentError::Transport(format!("CopierError without code: {}", message)),
            },
            "CopierUnexpectedError" => AgentError::CopierUnexpected {
                exit_code: details.exit_code.unwrap_or(-1),
                details: message,
            },
            "TransportError" => AgentError::Transport(message),
            "Timeout" => AgentError::Timeout,
            "ObjectClosed" => AgentError::ObjectClosed,
            "InternalError" => AgentError::Internal(message),
            other => AgentError::Transport(format!("{}: {}", other, message)),
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}

/// Wire form of an error inside a failure reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetails {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copier_code: Option<i32>,
    /// Raw copier exit code of an unexpected copier failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// OS error kind of a failed spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_kind: Option<String>,
    pub message: String,
}

/// One value of every variant, for exhaustive wire tests.
#[cfg(test)]
pub(crate) fn every_error_kind() -> Vec<AgentError> {
    vec![
        AgentError::InvalidArgument("missing container_name".to_string()),
        AgentError::InvalidMessage("bad body".to_string()),
        AgentError::DestinationNotFound("no primary".to_string()),
        AgentError::Spawn {
            kind: "NotFound".to_string(),
            message: "No such file or directory (os error 2)".to_string(),
        },
        AgentError::Io("permission denied".to_string()),
        AgentError::CopierTimeout,
        AgentError::OperationCanceled,
        AgentError::NotPrimary,
        AgentError::Copier {
            code: 5,
            message: "disk full".to_string(),
        },
        AgentError::CopierUnexpected {
            exit_code: 3,
            details: "garbled, report".to_string(),
        },
        AgentError::Transport("connection reset".to_string()),
        AgentError::Timeout,
        AgentError::ObjectClosed,
        AgentError::Internal("serializer failed".to_string()),
    ]
}
