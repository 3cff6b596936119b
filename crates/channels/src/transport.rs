use {
    async_trait::async_trait,
    botpanel_common::{BotConfig, BotId},
    secrecy::Secret,
};

use crate::Result;

/// A text message addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub text: String,
    pub username: Option<String>,
}

/// A click on one of the bot's inline buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonClick {
    /// Transport-level id used to acknowledge the click.
    pub callback_id: String,
    /// Button payload; matched exactly against button rules.
    pub data: String,
    /// Chat and message carrying the keyboard, when still accessible.
    pub chat_id: Option<i64>,
    pub message_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(InboundMessage),
    ButtonClick(ButtonClick),
}

/// Opens transport connections for bots.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Authenticate with the bot's token and prepare to receive.
    ///
    /// A rejected token must be reported as [`crate::Error::Credential`].
    async fn connect(&self, bot: &BotConfig) -> Result<Box<dyn Connection>>;
}

/// A live, single-owner connection for one bot.
#[async_trait]
pub trait Connection: Send {
    fn bot_id(&self) -> BotId;

    /// Wait for the next inbound event.
    ///
    /// Must be cancel-safe: dropping the future may not lose an event that
    /// was already handed out, nor one that was never returned.
    async fn receive_next(&mut self) -> Result<InboundEvent>;

    /// Send a text reply into a chat.
    async fn send(&mut self, chat_id: i64, text: &str) -> Result<()>;

    /// Acknowledge a button click and replace the clicked message's text.
    async fn edit_last_with_text(&mut self, click: &ButtonClick, text: &str) -> Result<()>;

    /// Release the connection. Called exactly once on every exit path.
    async fn close(&mut self);
}

/// Live credential check used by the admin layer.
#[async_trait]
pub trait CredentialProbe: Send + Sync {
    /// Reject tokens that are malformed for this network, without any I/O.
    fn check_format(&self, _token: &str) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Ask the network whether the token is valid; returns the bot's handle.
    async fn probe(&self, token: &Secret<String>) -> Result<String>;
}
