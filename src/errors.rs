/// Error types for each stage of the relay
use std::io;
use std::path::PathBuf;

/// A frame had the right shape but carried a value that is not a number.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("field `{field}` is not a finite number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("frame rejected: {0}")]
    Decode(#[from] DecodeError),

    #[error("serial transport failed: {0}")]
    Transport(#[from] io::Error),

    #[error("serial reader task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SourceError {
    /// Decode faults only cost the current frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Decode(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("no serial device found")]
    NotFound,

    #[error("serial reader is not available")]
    NotConnected,

    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to clone handle for {path}: {source}")]
    Clone {
        path: String,
        #[source]
        source: serialport::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid login credentials ({0})")]
    InvalidCredentials(String),

    #[error("sign-in temporarily blocked ({0})")]
    Blocked(String),

    #[error("sign-in rejected: {0}")]
    Rejected(String),

    #[error("account lookup returned no user")]
    UnknownAccount,

    #[error("authentication request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// Classify the `error.message` field of an Identity Toolkit error body.
    pub fn from_message(message: &str) -> Self {
        const INVALID: [&str; 5] = [
            "INVALID_EMAIL",
            "EMAIL_NOT_FOUND",
            "INVALID_PASSWORD",
            "MISSING_PASSWORD",
            "INVALID_LOGIN_CREDENTIALS",
        ];
        const BLOCKED: [&str; 4] = [
            "TOO_MANY_ATTEMPTS_TRY_LATER",
            "USER_DISABLED",
            "OPERATION_NOT_ALLOWED",
            "USER_NOT_FOUND",
        ];

        let upper = message.to_uppercase();
        if INVALID.contains(&message) {
            AuthError::InvalidCredentials(message.to_string())
        } else if BLOCKED.iter().any(|pattern| upper.contains(pattern)) {
            AuthError::Blocked(message.to_string())
        } else {
            AuthError::Rejected(message.to_string())
        }
    }

    /// Operator-facing advice for the failure.
    pub fn hint(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials(_) => {
                "Check your email and password, or reset the password from the app"
            }
            AuthError::Blocked(_) => {
                "You are temporarily blocked from signing in. Verify your email, reset your password, or wait and try again"
            }
            AuthError::Rejected(_) | AuthError::UnknownAccount => {
                "Check the Firebase project configuration in the secrets file"
            }
            AuthError::Http(_) => "Check the network connection",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("request to {path} failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} answered {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("invalid database path: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid database URL: {0}")]
    DatabaseUrl(#[from] url::ParseError),

    #[error("could not resolve serial port: {0}")]
    Port(#[from] PortError),

    #[error("failed to read password: {0}")]
    Prompt(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("sink write failed: {0}")]
    Sink(#[from] SinkError),
}
