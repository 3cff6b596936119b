mod bot_commands;
mod db_commands;
mod rule_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    botpanel_common::BotId,
    botpanel_config::BotpanelConfig,
    botpanel_rules::{RuleStore, store_sqlite::SqliteStore},
    botpanel_supervisor::{BotAdmin, DeferredLifecycle, Reconciler, Supervisor, SupervisorOptions},
    botpanel_telegram::{TelegramConnector, TelegramProbe},
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "botpanel", about = "botpanel: Telegram auto-reply bot supervisor", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (skips discovery of botpanel.{toml,yaml,json}).
    #[arg(long, global = true, env = "BOTPANEL_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL (overrides config value).
    #[arg(long, global = true, env = "BOTPANEL_DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot supervisor (default when no subcommand is provided).
    Serve,
    /// Bot management.
    Bots {
        #[command(subcommand)]
        action: bot_commands::BotAction,
    },
    /// Reply rule management.
    Rules {
        #[command(subcommand)]
        action: rule_commands::RuleAction,
    },
    /// Show what a bot would answer to a message.
    Test { bot: BotId, message: String },
    /// Database management (migrate, reset).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Config with command-line overrides applied.
fn resolve_config(cli: &Cli) -> BotpanelConfig {
    let mut config = botpanel_config::load_or_default(cli.config.as_deref());
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    config
}

async fn open_store(config: &BotpanelConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::new(&config.database.url)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    Ok(Arc::new(store))
}

/// Admin facade for one-shot commands. Worker changes are left to the
/// serving process, which picks them up on its next reconcile pass.
fn offline_admin(config: &BotpanelConfig, store: Arc<SqliteStore>) -> BotAdmin {
    BotAdmin::new(
        store,
        Arc::new(DeferredLifecycle),
        Arc::new(TelegramProbe::new(config.telegram.clone())),
    )
}

async fn serve(config: BotpanelConfig) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let options = SupervisorOptions::from(&config.supervisor);
    let connector = Arc::new(TelegramConnector::new(config.telegram.clone()));
    let supervisor = Supervisor::new(connector, store.clone(), options.clone());

    let bots = store.list_active_bots().await?;
    supervisor.initialize(&bots).await;

    let reconciler = Reconciler::new(Arc::clone(&supervisor), store, &options);
    reconciler.start();
    info!(running = supervisor.running_bots().len(), "supervisor ready, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    reconciler.shutdown().await;
    supervisor.shutdown().await;
    Ok(())
}

async fn test_reply(admin: &BotAdmin, bot: BotId, message: &str) -> anyhow::Result<()> {
    match admin.test_reply(bot, message).await? {
        Some(reply) => println!("Bot would respond: {reply}"),
        None => println!("No rule matches; the bot would not respond."),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    let config = resolve_config(&cli);

    match cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "botpanel starting");
            serve(config).await
        },
        Some(Commands::Db { action }) => db_commands::handle_db(action, &config).await,
        Some(Commands::Bots { action }) => {
            let admin = offline_admin(&config, open_store(&config).await?);
            bot_commands::handle_bots(&admin, action).await
        },
        Some(Commands::Rules { action }) => {
            let admin = offline_admin(&config, open_store(&config).await?);
            rule_commands::handle_rules(&admin, action).await
        },
        Some(Commands::Test { bot, message }) => {
            let admin = offline_admin(&config, open_store(&config).await?);
            test_reply(&admin, bot, &message).await
        },
    }
}

/// Print non-fatal problems reported by an admin action.
pub(crate) fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["botpanel"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn database_url_overrides_config() {
        let cli =
            Cli::try_parse_from(["botpanel", "--database-url", "sqlite::memory:", "serve"]).unwrap();
        assert_eq!(resolve_config(&cli).database.url, "sqlite::memory:");
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("botpanel.toml");
        std::fs::write(&path, "[supervisor]\nreconcile_interval_secs = 3\n").unwrap();

        let cli = Cli::try_parse_from(["botpanel", "--config", path.to_str().unwrap(), "serve"])
            .unwrap();
        assert_eq!(resolve_config(&cli).supervisor.reconcile_interval_secs, 3);
    }

    #[test]
    fn test_command_parses_bot_id() {
        let cli = Cli::try_parse_from(["botpanel", "test", "7", "hello there"]).unwrap();
        match cli.command {
            Some(Commands::Test { bot, message }) => {
                assert_eq!(bot, BotId(7));
                assert_eq!(message, "hello there");
            },
            _ => panic!("expected test command"),
        }
        assert!(Cli::try_parse_from(["botpanel", "test", "seven", "hi"]).is_err());
    }

    #[tokio::test]
    async fn offline_admin_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BotpanelConfig::default();
        config.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("bots.db").display());
        let admin = offline_admin(&config, open_store(&config).await.unwrap());

        assert!(admin.list_bots().await.unwrap().is_empty());
        assert!(test_reply(&admin, BotId(1), "hi").await.is_err());
    }
}
