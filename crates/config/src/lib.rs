//! Configuration loading and env substitution.
//!
//! Config files: `botpanel.toml`, `botpanel.yaml`, or `botpanel.json`
//! Searched in `./` then `~/.config/botpanel/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, load_config, load_or_default},
    schema::{BotpanelConfig, DatabaseConfig, SupervisorConfig, TelegramConfig},
};
