use std::time::Duration;

use {botpanel_common::BotId, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error("bot {bot_id}: credential rejected: {message}")]
    Credential { bot_id: BotId, message: String },

    #[error("bot {bot_id}: worker did not confirm start within {timeout:?}")]
    StartTimeout { bot_id: BotId, timeout: Duration },

    #[error("bot {bot_id}: worker did not stop within {timeout:?}, task aborted")]
    ForcedStop { bot_id: BotId, timeout: Duration },

    #[error("bot {bot_id}: worker faulted: {message}")]
    WorkerFaulted { bot_id: BotId, message: String },

    #[error("unknown bot: {bot_id}")]
    UnknownBot { bot_id: BotId },

    #[error("{message}")]
    Validation { message: String },

    #[error(transparent)]
    Store(#[from] botpanel_rules::Error),
}

impl Error {
    #[must_use]
    pub fn credential(bot_id: BotId, message: impl Into<String>) -> Self {
        Self::Credential {
            bot_id,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn start_timeout(bot_id: BotId, timeout: Duration) -> Self {
        Self::StartTimeout { bot_id, timeout }
    }

    #[must_use]
    pub fn forced_stop(bot_id: BotId, timeout: Duration) -> Self {
        Self::ForcedStop { bot_id, timeout }
    }

    #[must_use]
    pub fn worker_faulted(bot_id: BotId, message: impl Into<String>) -> Self {
        Self::WorkerFaulted {
            bot_id,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_bot(bot_id: BotId) -> Self {
        Self::UnknownBot { bot_id }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
