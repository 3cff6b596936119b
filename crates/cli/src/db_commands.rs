use std::path::PathBuf;

use {botpanel_config::BotpanelConfig, clap::Subcommand};

#[derive(Subcommand)]
pub enum DbAction {
    /// Create the database if needed and run pending migrations.
    Migrate,
    /// Delete the SQLite database file (and its WAL/SHM companions).
    Reset,
}

pub async fn handle_db(action: DbAction, config: &BotpanelConfig) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate => {
            crate::open_store(config).await?;
            println!("Database at {} is up to date.", config.database.url);
            Ok(())
        },
        DbAction::Reset => reset_database(&config.database.url),
    }
}

/// File path behind a `sqlite:` URL, or `None` for in-memory databases.
fn sqlite_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

fn reset_database(url: &str) -> anyhow::Result<()> {
    let Some(main_db) = sqlite_path(url) else {
        anyhow::bail!("not a file-backed SQLite database: {url}");
    };

    let mut deleted = false;
    // Also delete WAL and SHM files that SQLite may have created.
    for suffix in ["", "-wal", "-shm"] {
        let mut name = main_db.clone().into_os_string();
        name.push(suffix);
        let path = PathBuf::from(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("Deleted: {}", path.display());
            deleted = true;
        }
    }

    if deleted {
        println!("Database deleted. Run `botpanel db migrate` to recreate it.");
    } else {
        println!("No database file found at {}.", main_db.display());
    }
    Ok(())
}
