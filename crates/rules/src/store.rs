use {
    async_trait::async_trait,
    botpanel_common::{BotConfig, BotId, Rule, RuleKind},
    secrecy::Secret,
};

use crate::Result;

/// Read side consumed by the supervisor and its workers.
///
/// Implementations must return rules in a stable order (insertion order);
/// the matcher's first-match semantics depend on it.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_active_bots(&self) -> Result<Vec<BotConfig>>;
    async fn get_bot(&self, bot_id: BotId) -> Result<Option<BotConfig>>;
    async fn list_buttons(&self, bot_id: BotId) -> Result<Vec<Rule>>;
    async fn list_triggers(&self, bot_id: BotId) -> Result<Vec<Rule>>;
}

/// Fields for registering a bot.
#[derive(Clone)]
pub struct NewBot {
    pub name: String,
    pub description: Option<String>,
    pub token: Secret<String>,
    pub active: bool,
}

/// Editable fields of an existing bot. The `active` flag has its own call.
#[derive(Clone)]
pub struct BotUpdate {
    pub name: String,
    pub description: Option<String>,
    pub token: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct NewRule {
    pub bot_id: BotId,
    pub kind: RuleKind,
    pub match_text: String,
    pub reply_text: String,
}

/// Write side used by the admin layer.
#[async_trait]
pub trait BotStore: RuleStore {
    async fn list_bots(&self) -> Result<Vec<BotConfig>>;
    async fn insert_bot(&self, bot: NewBot) -> Result<BotConfig>;
    async fn update_bot(&self, bot_id: BotId, update: BotUpdate) -> Result<BotConfig>;
    async fn set_active(&self, bot_id: BotId, active: bool) -> Result<BotConfig>;
    /// Delete a bot together with all of its rules.
    async fn delete_bot(&self, bot_id: BotId) -> Result<()>;
    async fn insert_rule(&self, rule: NewRule) -> Result<Rule>;
    /// Delete a rule, returning it.
    async fn delete_rule(&self, rule_id: i64) -> Result<Rule>;
}
