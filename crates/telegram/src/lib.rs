//! Telegram transport for botpanel.
//!
//! Implements the `botpanel-channels` connector traits on top of teloxide,
//! using manual `getUpdates` long polling so the supervisor owns the loop.

pub mod bot;
pub mod error;
pub mod probe;
pub mod token;

pub use {
    bot::{TelegramConnection, TelegramConnector},
    probe::TelegramProbe,
    token::is_valid_token_format,
};
