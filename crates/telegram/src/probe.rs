use std::time::Duration;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    teloxide::requests::Requester,
    tracing::debug,
};

use {
    botpanel_channels::{CredentialProbe, Result},
    botpanel_config::TelegramConfig,
};

use crate::{
    bot::build_bot,
    error::classify,
    token::{TOKEN_FORMAT_HINT, is_valid_token_format},
};

/// Checks bot tokens against Telegram with a single `getMe` call.
#[derive(Debug, Clone, Default)]
pub struct TelegramProbe {
    config: TelegramConfig,
}

impl TelegramProbe {
    pub fn new(config: TelegramConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CredentialProbe for TelegramProbe {
    fn check_format(&self, token: &str) -> std::result::Result<(), String> {
        if is_valid_token_format(token) {
            Ok(())
        } else {
            Err(TOKEN_FORMAT_HINT.to_string())
        }
    }

    async fn probe(&self, token: &Secret<String>) -> Result<String> {
        let bot = build_bot(
            token.expose_secret().trim(),
            &self.config,
            Duration::from_secs(self.config.probe_timeout_secs),
        )?;
        let me = bot.get_me().await.map_err(classify)?;
        let handle = me
            .username
            .clone()
            .map_or_else(|| me.first_name.clone(), |u| format!("@{u}"));
        debug!(%handle, "telegram token verified");
        Ok(handle)
    }
}
