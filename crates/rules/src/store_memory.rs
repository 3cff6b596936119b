//! In-memory store for tests and dry runs.

use std::{collections::BTreeMap, sync::Mutex};

use {
    async_trait::async_trait,
    botpanel_common::{BotConfig, BotId, Rule, RuleKind},
};

use crate::{
    Error, Result,
    store::{BotStore, BotUpdate, NewBot, NewRule, RuleStore},
};

#[derive(Default)]
struct State {
    bots: BTreeMap<BotId, BotConfig>,
    rules: Vec<Rule>,
    next_bot_id: i64,
    next_rule_id: i64,
}

/// `BTreeMap`-backed store. No persistence.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rules_of(&self, bot_id: BotId, kind: RuleKind) -> Vec<Rule> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .rules
            .iter()
            .filter(|r| r.bot_id == bot_id && r.kind == kind)
            .cloned()
            .collect()
    }

    fn modify_bot(&self, bot_id: BotId, f: impl FnOnce(&mut BotConfig)) -> Result<BotConfig> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let bot = state
            .bots
            .get_mut(&bot_id)
            .ok_or_else(|| Error::bot_not_found(bot_id))?;
        f(bot);
        Ok(bot.clone())
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn list_active_bots(&self) -> Result<Vec<BotConfig>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.bots.values().filter(|b| b.active).cloned().collect())
    }

    async fn get_bot(&self, bot_id: BotId) -> Result<Option<BotConfig>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.bots.get(&bot_id).cloned())
    }

    async fn list_buttons(&self, bot_id: BotId) -> Result<Vec<Rule>> {
        Ok(self.rules_of(bot_id, RuleKind::Button))
    }

    async fn list_triggers(&self, bot_id: BotId) -> Result<Vec<Rule>> {
        Ok(self.rules_of(bot_id, RuleKind::Trigger))
    }
}

#[async_trait]
impl BotStore for InMemoryStore {
    async fn list_bots(&self) -> Result<Vec<BotConfig>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.bots.values().cloned().collect())
    }

    async fn insert_bot(&self, bot: NewBot) -> Result<BotConfig> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_bot_id += 1;
        let config = BotConfig {
            id: BotId(state.next_bot_id),
            token: bot.token,
            name: bot.name,
            description: bot.description,
            active: bot.active,
        };
        state.bots.insert(config.id, config.clone());
        Ok(config)
    }

    async fn update_bot(&self, bot_id: BotId, update: BotUpdate) -> Result<BotConfig> {
        self.modify_bot(bot_id, |bot| {
            bot.name = update.name;
            bot.description = update.description;
            bot.token = update.token;
        })
    }

    async fn set_active(&self, bot_id: BotId, active: bool) -> Result<BotConfig> {
        self.modify_bot(bot_id, |bot| bot.active = active)
    }

    async fn delete_bot(&self, bot_id: BotId) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.bots.remove(&bot_id).is_none() {
            return Err(Error::bot_not_found(bot_id));
        }
        state.rules.retain(|r| r.bot_id != bot_id);
        Ok(())
    }

    async fn insert_rule(&self, rule: NewRule) -> Result<Rule> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.bots.contains_key(&rule.bot_id) {
            return Err(Error::bot_not_found(rule.bot_id));
        }
        state.next_rule_id += 1;
        let stored = Rule {
            id: state.next_rule_id,
            bot_id: rule.bot_id,
            kind: rule.kind,
            match_text: rule.match_text,
            reply_text: rule.reply_text,
        };
        state.rules.push(stored.clone());
        Ok(stored)
    }

    async fn delete_rule(&self, rule_id: i64) -> Result<Rule> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let pos = state
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| Error::rule_not_found(rule_id))?;
        Ok(state.rules.remove(pos))
    }
}
