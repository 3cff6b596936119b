use {
    botpanel_common::{BotId, Rule, RuleKind},
    botpanel_rules::NewRule,
    botpanel_supervisor::BotAdmin,
    clap::Subcommand,
};

use crate::print_warnings;

#[derive(Subcommand)]
pub enum RuleAction {
    /// List a bot's rules in match order (buttons first).
    List { bot: BotId },
    /// Add a reply rule.
    Add {
        bot: BotId,
        /// `button` or `trigger`.
        #[arg(long, default_value = "trigger")]
        kind: RuleKind,
        /// Text to look for in incoming messages.
        #[arg(long = "match")]
        match_text: String,
        /// Text sent back when the rule matches.
        #[arg(long)]
        reply: String,
    },
    /// Remove a rule by id.
    Remove { id: i64 },
}

pub async fn handle_rules(admin: &BotAdmin, action: RuleAction) -> anyhow::Result<()> {
    match action {
        RuleAction::List { bot } => {
            let rules = admin.list_rules(bot).await?;
            if rules.is_empty() {
                println!("Bot {bot} has no rules.");
            }
            for rule in &rules {
                println!("{}", describe(rule));
            }
        },
        RuleAction::Add {
            bot,
            kind,
            match_text,
            reply,
        } => {
            let outcome = admin
                .add_rule(NewRule {
                    bot_id: bot,
                    kind,
                    match_text,
                    reply_text: reply,
                })
                .await?;
            println!("Added {}", describe(&outcome.value));
            print_warnings(&outcome.warnings);
        },
        RuleAction::Remove { id } => {
            let outcome = admin.remove_rule(id).await?;
            println!("Removed {}", describe(&outcome.value));
        },
    }
    Ok(())
}

fn describe(rule: &Rule) -> String {
    format!(
        "{} #{}: {:?} -> {:?}",
        rule.kind, rule.id, rule.match_text, rule.reply_text
    )
}
