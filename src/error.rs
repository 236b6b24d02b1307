use std::fmt;

/// Why a request was cancelled before it produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The connectivity probe reported the client offline; the call never left.
    Offline,
    /// The caller (or a superseding action) aborted the call.
    Aborted,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("client offline"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Network-level outcome of a failed request.
///
/// Local precondition failures (`InvalidArgument`, `MissingToken`) have no
/// classification: they never reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified {
    Offline,
    HttpError(u16),
    Cancelled,
}

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not signed in")]
    MissingToken,

    #[error("Server unreachable")]
    Offline,

    #[error("HTTP error {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("Request cancelled ({0})")]
    Cancelled(CancelReason),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[cfg(feature = "provider")]
    #[error("Identity provider error during {operation}: {detail}")]
    Provider {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
}

impl Error {
    /// Classify a failure the way the interceptor reports it.
    ///
    /// Returns `None` for errors raised before any network activity.
    #[must_use]
    pub fn classify(&self) -> Option<Classified> {
        match self {
            Self::Offline => Some(Classified::Offline),
            Self::Http { status, .. } => Some(Classified::HttpError(*status)),
            Self::Cancelled(_) => Some(Classified::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// HTTP status of a server-side rejection.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
