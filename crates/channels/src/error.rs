/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Transport failures, classified by how a worker must react to them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The network rejected the credential. Not retried automatically.
    #[error("credential rejected: {message}")]
    Credential { message: String },

    /// A reply could not be delivered. The worker logs it and keeps going.
    #[error("send failed: {message}")]
    Send { message: String },

    /// Unrecoverable; the worker faults and waits for reconciliation.
    #[error("transport failed: {message}")]
    Fatal { message: String },

    /// Temporary receive failure (network blip, rate limit).
    #[error("transient transport error: {message}")]
    Transient { message: String },
}

pub type TransportError = Error;

impl Error {
    #[must_use]
    pub fn credential(message: impl std::fmt::Display) -> Self {
        Self::Credential {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn send(message: impl std::fmt::Display) -> Self {
        Self::Send {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn fatal(message: impl std::fmt::Display) -> Self {
        Self::Fatal {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient {
            message: message.to_string(),
        }
    }

    /// Whether a receive loop must give up on this connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Credential { .. } | Self::Fatal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(Error::credential("401").is_fatal());
        assert!(Error::fatal("conflict").is_fatal());
        assert!(!Error::transient("timeout").is_fatal());
        assert!(!Error::send("blocked").is_fatal());
    }
}
