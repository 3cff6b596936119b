//! Shared types and error definitions used across all botpanel crates.

pub mod error;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    types::{BotConfig, BotId, Rule, RuleKind},
};
