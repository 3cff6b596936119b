use {botpanel_common::BotId, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("bot not found: {bot_id}")]
    BotNotFound { bot_id: BotId },

    #[error("rule not found: {rule_id}")]
    RuleNotFound { rule_id: i64 },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bot_not_found(bot_id: BotId) -> Self {
        Self::BotNotFound { bot_id }
    }

    #[must_use]
    pub fn rule_not_found(rule_id: i64) -> Self {
        Self::RuleNotFound { rule_id }
    }
}

impl botpanel_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

botpanel_common::impl_context!();
