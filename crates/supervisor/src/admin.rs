//! Operator-facing bot and rule management.
//!
//! Every write is persisted first. Live side effects (credential probe,
//! starting or stopping the worker) run afterwards and only ever add
//! warnings; they never roll back the saved change.

use std::sync::Arc;

use {
    async_trait::async_trait,
    botpanel_channels::CredentialProbe,
    botpanel_common::{BotConfig, BotId, Rule},
    botpanel_rules::{BotStore, BotUpdate, NewBot, NewRule, match_reply},
    secrecy::{ExposeSecret, Secret},
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    supervisor::{StartOutcome, StopOutcome, Supervisor},
};

/// Start/stop side of the admin layer.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self, bot: &BotConfig) -> Result<StartOutcome>;
    async fn stop(&self, bot_id: BotId) -> Result<StopOutcome>;
    async fn restart(&self, bot: &BotConfig) -> Result<StartOutcome>;
}

#[async_trait]
impl Lifecycle for Supervisor {
    async fn start(&self, bot: &BotConfig) -> Result<StartOutcome> {
        Supervisor::start(self, bot).await
    }

    async fn stop(&self, bot_id: BotId) -> Result<StopOutcome> {
        Supervisor::stop(self, bot_id).await
    }

    async fn restart(&self, bot: &BotConfig) -> Result<StartOutcome> {
        Supervisor::restart(self, bot).await
    }
}

/// Lifecycle for processes that do not own any workers, such as one-shot
/// CLI commands. The serving process applies the change on its next
/// reconcile pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredLifecycle;

#[async_trait]
impl Lifecycle for DeferredLifecycle {
    async fn start(&self, _bot: &BotConfig) -> Result<StartOutcome> {
        Ok(StartOutcome::Deferred)
    }

    async fn stop(&self, _bot_id: BotId) -> Result<StopOutcome> {
        Ok(StopOutcome::Deferred)
    }

    async fn restart(&self, _bot: &BotConfig) -> Result<StartOutcome> {
        Ok(StartOutcome::Deferred)
    }
}

/// Result of an admin action plus any non-fatal problems it ran into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminOutcome<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

impl<T> AdminOutcome<T> {
    fn new(value: T, warnings: Vec<String>) -> Self {
        Self { value, warnings }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub struct BotAdmin {
    store: Arc<dyn BotStore>,
    lifecycle: Arc<dyn Lifecycle>,
    probe: Arc<dyn CredentialProbe>,
}

impl BotAdmin {
    pub fn new(
        store: Arc<dyn BotStore>,
        lifecycle: Arc<dyn Lifecycle>,
        probe: Arc<dyn CredentialProbe>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            probe,
        }
    }

    pub async fn list_bots(&self) -> Result<Vec<BotConfig>> {
        Ok(self.store.list_bots().await?)
    }

    pub async fn get_bot(&self, bot_id: BotId) -> Result<BotConfig> {
        self.store
            .get_bot(bot_id)
            .await?
            .ok_or_else(|| Error::unknown_bot(bot_id))
    }

    /// Buttons first, then triggers, each in match order.
    pub async fn list_rules(&self, bot_id: BotId) -> Result<Vec<Rule>> {
        self.get_bot(bot_id).await?;
        let mut rules = self.store.list_buttons(bot_id).await?;
        rules.extend(self.store.list_triggers(bot_id).await?);
        Ok(rules)
    }

    pub async fn create_bot(&self, bot: NewBot) -> Result<AdminOutcome<BotConfig>> {
        validate_name(&bot.name)?;
        self.check_format(&bot.token)?;

        let mut warnings = Vec::new();
        self.probe_token(&bot.token, &mut warnings).await;

        let bot = self.store.insert_bot(bot).await?;
        info!(bot_id = %bot.id, name = %bot.name, "bot created");

        if bot.active
            && let Err(e) = self.lifecycle.start(&bot).await
        {
            warnings.push(format!("Bot saved but failed to start: {e}"));
        }
        Ok(AdminOutcome::new(bot, warnings))
    }

    /// Save new details. An active bot is restarted so it runs with the saved
    /// config; an inactive one is stopped if its token changed.
    pub async fn update_bot(&self, bot_id: BotId, update: BotUpdate) -> Result<AdminOutcome<BotConfig>> {
        validate_name(&update.name)?;
        self.check_format(&update.token)?;
        let previous = self.get_bot(bot_id).await?;

        let mut warnings = Vec::new();
        self.probe_token(&update.token, &mut warnings).await;

        let token_changed = previous.token.expose_secret() != update.token.expose_secret();
        let bot = self.store.update_bot(bot_id, update).await?;
        info!(%bot_id, token_changed, "bot updated");

        if bot.active {
            if let Err(e) = self.lifecycle.restart(&bot).await {
                warnings.push(format!("Bot saved but failed to restart: {e}"));
            }
        } else if token_changed && let Err(e) = self.lifecycle.stop(bot_id).await {
            warnings.push(format!("Bot saved but failed to stop: {e}"));
        }
        Ok(AdminOutcome::new(bot, warnings))
    }

    /// Flip the `active` flag and start or stop the worker to match.
    pub async fn toggle_bot(&self, bot_id: BotId) -> Result<AdminOutcome<BotConfig>> {
        let current = self.get_bot(bot_id).await?;
        let bot = self.store.set_active(bot_id, !current.active).await?;
        info!(%bot_id, active = bot.active, "bot toggled");

        let mut warnings = Vec::new();
        if bot.active {
            if let Err(e) = self.lifecycle.start(&bot).await {
                warnings.push(format!("Bot activated but failed to start: {e}"));
            }
        } else if let Err(e) = self.lifecycle.stop(bot_id).await {
            warnings.push(format!("Bot deactivated but failed to stop: {e}"));
        }
        Ok(AdminOutcome::new(bot, warnings))
    }

    /// Stop the worker, then delete the bot and all of its rules.
    pub async fn delete_bot(&self, bot_id: BotId) -> Result<AdminOutcome<BotConfig>> {
        let bot = self.get_bot(bot_id).await?;

        let mut warnings = Vec::new();
        if let Err(e) = self.lifecycle.stop(bot_id).await {
            warnings.push(format!("Failed to stop bot before deleting: {e}"));
        }
        self.store.delete_bot(bot_id).await?;
        info!(%bot_id, name = %bot.name, "bot deleted");
        Ok(AdminOutcome::new(bot, warnings))
    }

    pub async fn add_rule(&self, rule: NewRule) -> Result<AdminOutcome<Rule>> {
        let match_text = rule.match_text.trim().to_string();
        let reply_text = rule.reply_text.trim().to_string();
        if match_text.is_empty() {
            return Err(Error::validation(format!("{} text must not be empty", rule.kind)));
        }
        let max = rule.kind.max_match_len();
        if match_text.chars().count() > max {
            return Err(Error::validation(format!(
                "{} text must be at most {max} characters",
                rule.kind
            )));
        }
        if reply_text.is_empty() {
            return Err(Error::validation("reply text must not be empty"));
        }
        self.get_bot(rule.bot_id).await?;

        let rule = self
            .store
            .insert_rule(NewRule {
                match_text,
                reply_text,
                ..rule
            })
            .await?;
        info!(bot_id = %rule.bot_id, rule_id = rule.id, kind = %rule.kind, "rule added");
        Ok(AdminOutcome::new(rule, Vec::new()))
    }

    pub async fn remove_rule(&self, rule_id: i64) -> Result<AdminOutcome<Rule>> {
        let rule = self.store.delete_rule(rule_id).await?;
        info!(bot_id = %rule.bot_id, rule_id, kind = %rule.kind, "rule removed");
        Ok(AdminOutcome::new(rule, Vec::new()))
    }

    /// What the bot would answer to `text`, without touching any chat.
    pub async fn test_reply(&self, bot_id: BotId, text: &str) -> Result<Option<String>> {
        self.get_bot(bot_id).await?;
        Ok(match_reply(self.store.as_ref(), bot_id, text).await?)
    }

    fn check_format(&self, token: &Secret<String>) -> Result<()> {
        self.probe
            .check_format(token.expose_secret())
            .map_err(Error::validation)
    }

    async fn probe_token(&self, token: &Secret<String>, warnings: &mut Vec<String>) {
        match self.probe.probe(token).await {
            Ok(handle) => info!(%handle, "bot token verified"),
            Err(e) => {
                warn!(error = %e, "bot token could not be verified");
                warnings.push(format!("Token validation failed: {e}. Saving anyway."));
            },
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("bot name must not be empty"));
    }
    Ok(())
}
