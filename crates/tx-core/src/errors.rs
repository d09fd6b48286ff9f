/// Whether a messaging-platform failure leaves the bot able to continue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// Network hiccup, flood control or a rejected request. Logged; the flow goes on.
    Transient,
    /// Bad token or revoked bot. The conversational loop cannot make progress.
    Fatal,
}

/// Core error type for the exporter.
///
/// Adapter crates map their specific errors into this type so the export flow
/// can decide per failure whether to skip a project, skip a contributor or stop
/// the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tracker transport error: {0}")]
    Transport(String),

    #[error("tracker returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("tracker response decode error: {0}")]
    Decode(String),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("platform error ({kind:?}): {message}")]
    Platform {
        kind: PlatformErrorKind,
        message: String,
    },
}

impl Error {
    pub fn platform_transient(message: impl Into<String>) -> Self {
        Self::Platform {
            kind: PlatformErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn platform_fatal(message: impl Into<String>) -> Self {
        Self::Platform {
            kind: PlatformErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// True when the process should stop instead of logging and moving on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Platform {
                    kind: PlatformErrorKind::Fatal,
                    ..
                }
        )
    }

    /// True for failures raised while fetching from the tracker.
    pub fn is_tracker_failure(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Status { .. } | Error::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
