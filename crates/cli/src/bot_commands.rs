use {
    botpanel_common::{BotConfig, BotId},
    botpanel_rules::{BotUpdate, NewBot},
    botpanel_supervisor::BotAdmin,
    clap::Subcommand,
    secrecy::Secret,
};

use crate::print_warnings;

const APPLIED_BY_SERVER: &str = "A running `botpanel serve` applies this on its next reconcile pass.";

#[derive(Subcommand)]
pub enum BotAction {
    /// List registered bots.
    List,
    /// Register a new bot.
    Add {
        /// Display name.
        #[arg(long)]
        name: String,
        /// Bot API token from @BotFather.
        #[arg(long, env = "BOTPANEL_BOT_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long)]
        description: Option<String>,
        /// Save the bot without activating it.
        #[arg(long, default_value_t = false)]
        inactive: bool,
    },
    /// Change a bot's name, description or token.
    Edit {
        id: BotId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Replacement token; the worker restarts with it.
        #[arg(long)]
        token: Option<String>,
    },
    /// Activate or deactivate a bot.
    Toggle { id: BotId },
    /// Delete a bot and all of its rules.
    Delete { id: BotId },
}

pub async fn handle_bots(admin: &BotAdmin, action: BotAction) -> anyhow::Result<()> {
    match action {
        BotAction::List => {
            let bots = admin.list_bots().await?;
            if bots.is_empty() {
                println!("No bots registered.");
            }
            for bot in &bots {
                println!("{}", describe(bot));
            }
        },
        BotAction::Add {
            name,
            token,
            description,
            inactive,
        } => {
            let outcome = admin
                .create_bot(NewBot {
                    name,
                    description,
                    token: Secret::new(token.trim().to_string()),
                    active: !inactive,
                })
                .await?;
            println!("Created {}", describe(&outcome.value));
            print_warnings(&outcome.warnings);
            if outcome.value.active {
                println!("{APPLIED_BY_SERVER}");
            }
        },
        BotAction::Edit {
            id,
            name,
            description,
            token,
        } => {
            let current = admin.get_bot(id).await?;
            let update = BotUpdate {
                name: name.unwrap_or(current.name),
                description: description.or(current.description),
                token: token
                    .map(|t| Secret::new(t.trim().to_string()))
                    .unwrap_or(current.token),
            };
            let outcome = admin.update_bot(id, update).await?;
            println!("Updated {}", describe(&outcome.value));
            print_warnings(&outcome.warnings);
        },
        BotAction::Toggle { id } => {
            let outcome = admin.toggle_bot(id).await?;
            let state = if outcome.value.active {
                "activated"
            } else {
                "deactivated"
            };
            println!("Bot {} {state}.", outcome.value.id);
            print_warnings(&outcome.warnings);
            println!("{APPLIED_BY_SERVER}");
        },
        BotAction::Delete { id } => {
            let outcome = admin.delete_bot(id).await?;
            println!("Deleted bot {} ({}) and its rules.", outcome.value.id, outcome.value.name);
            print_warnings(&outcome.warnings);
        },
    }
    Ok(())
}

fn describe(bot: &BotConfig) -> String {
    let state = if bot.active { "active" } else { "inactive" };
    match &bot.description {
        Some(description) => format!("#{} {} [{state}]: {description}", bot.id, bot.name),
        None => format!("#{} {} [{state}]", bot.id, bot.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_never_shows_token() {
        let bot = BotConfig {
            id: BotId(3),
            token: Secret::new("123:SECRET".into()),
            name: "helper".into(),
            description: Some("support".into()),
            active: false,
        };
        let line = describe(&bot);
        assert_eq!(line, "#3 helper [inactive]: support");
        assert!(!line.contains("SECRET"));
    }
}
