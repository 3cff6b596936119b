use std::fmt;

use botpanel_channels::TransportError;

/// Why a worker gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The network rejected the bot's token.
    Credential(String),
    /// Any other unrecoverable transport failure.
    Transport(String),
}

impl Fault {
    pub fn message(&self) -> &str {
        match self {
            Self::Credential(message) | Self::Transport(message) => message,
        }
    }
}

impl From<&TransportError> for Fault {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Credential { message } => Self::Credential(message.clone()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential(message) => write!(f, "credential rejected: {message}"),
            Self::Transport(message) => f.write_str(message),
        }
    }
}

/// Lifecycle of a single worker task, published over a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Connecting,
    Running,
    Stopping,
    Stopped,
    Faulted(Fault),
}

impl WorkerState {
    /// `Stopped` and `Faulted` are final; the task is exiting or gone.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted(_))
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Connecting => f.write_str("connecting"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
            Self::Stopped => f.write_str("stopped"),
            Self::Faulted(fault) => write!(f, "faulted ({fault})"),
        }
    }
}

/// Dashboard view of a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotStatus {
    /// Registered, waiting for the worker to confirm it is polling.
    Starting,
    Running,
    Stopped,
    Faulted,
    /// Never started by this process.
    Unknown,
}

impl BotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
            Self::Unknown => "unknown",
        }
    }
}

impl From<&WorkerState> for BotStatus {
    fn from(state: &WorkerState) -> Self {
        match state {
            WorkerState::Created | WorkerState::Connecting => Self::Starting,
            WorkerState::Running => Self::Running,
            WorkerState::Stopping | WorkerState::Stopped => Self::Stopped,
            WorkerState::Faulted(_) => Self::Faulted,
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
