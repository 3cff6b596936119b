//! Bot and rule persistence plus the inbound-text matcher.
//!
//! Workers only read through [`RuleStore`]; the admin layer writes through
//! [`BotStore`]. Rules are fetched on every lookup, never cached.

pub mod error;
pub mod matcher;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;

pub use {
    error::{Error, Result},
    matcher::{first_match, match_reply, resolve_button},
    store::{BotStore, BotUpdate, NewBot, NewRule, RuleStore},
};

/// Run database migrations for the bot and rule tables.
///
/// Should be called at application startup when using
/// [`store_sqlite::SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
