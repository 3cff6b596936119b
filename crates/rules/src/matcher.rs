//! Maps inbound text to a reply.
//!
//! Button rules are checked before trigger rules; inside each kind the first
//! rule in store order wins. A rule matches when its text occurs anywhere in
//! the message, ignoring case. This is plain substring matching, so a trigger
//! of `"I"` also answers `"Italy"`.

use {
    botpanel_common::{BotId, Rule},
    tracing::debug,
};

use crate::{Result, store::RuleStore};

/// Return the first rule whose `match_text` occurs in `text`, case-folded.
///
/// Empty input never matches, and rules with empty `match_text` are skipped
/// (they would otherwise match everything).
pub fn first_match<'a>(rules: &'a [Rule], text: &str) -> Option<&'a Rule> {
    if text.is_empty() {
        return None;
    }
    let haystack = text.to_lowercase();
    rules
        .iter()
        .find(|rule| !rule.match_text.is_empty() && haystack.contains(&rule.match_text.to_lowercase()))
}

/// Resolve the reply for an inbound message.
///
/// `Ok(None)` means no rule matched; only store failures are errors.
pub async fn match_reply(store: &dyn RuleStore, bot_id: BotId, text: &str) -> Result<Option<String>> {
    if text.is_empty() {
        return Ok(None);
    }

    let buttons = store.list_buttons(bot_id).await?;
    if let Some(rule) = first_match(&buttons, text) {
        debug!(%bot_id, rule_id = rule.id, kind = "button", "rule matched");
        return Ok(Some(rule.reply_text.clone()));
    }

    let triggers = store.list_triggers(bot_id).await?;
    if let Some(rule) = first_match(&triggers, text) {
        debug!(%bot_id, rule_id = rule.id, kind = "trigger", "rule matched");
        return Ok(Some(rule.reply_text.clone()));
    }

    debug!(%bot_id, buttons = buttons.len(), triggers = triggers.len(), "no rule matched");
    Ok(None)
}

/// Resolve a button click by exact (case-sensitive) button text.
pub async fn resolve_button(store: &dyn RuleStore, bot_id: BotId, data: &str) -> Result<Option<String>> {
    let buttons = store.list_buttons(bot_id).await?;
    Ok(buttons
        .into_iter()
        .find(|rule| rule.match_text == data)
        .map(|rule| rule.reply_text))
}
