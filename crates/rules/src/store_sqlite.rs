//! SQLite-backed bot and rule store using sqlx.

use {
    async_trait::async_trait,
    botpanel_common::{BotConfig, BotId, Rule, RuleKind},
    secrecy::{ExposeSecret, Secret},
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqlitePoolOptions, SqliteRow},
    },
};

use crate::{
    Error, Result,
    error::Context,
    store::{BotStore, BotUpdate, NewBot, NewRule, RuleStore},
};

const BOT_COLUMNS: &str = "id, name, description, token, active";
const RULE_COLUMNS: &str = "id, bot_id, kind, match_text, reply_text";

/// SQLite-backed persistence for bots and their rules.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to SQLite")?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn rules_of(&self, bot_id: BotId, kind: RuleKind) -> Result<Vec<Rule>> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE bot_id = ? AND kind = ? ORDER BY id"
        ))
        .bind(bot_id.0)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn fetch_bot(&self, bot_id: BotId) -> Result<BotConfig> {
        self.get_bot(bot_id)
            .await?
            .ok_or_else(|| Error::bot_not_found(bot_id))
    }
}

fn bot_from_row(row: &SqliteRow) -> BotConfig {
    BotConfig {
        id: BotId(row.get("id")),
        token: Secret::new(row.get("token")),
        name: row.get("name"),
        description: row.get("description"),
        active: row.get::<i64, _>("active") != 0,
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<Rule> {
    let kind: String = row.get("kind");
    Ok(Rule {
        id: row.get("id"),
        bot_id: BotId(row.get("bot_id")),
        kind: kind.parse::<RuleKind>().context("corrupt rules row")?,
        match_text: row.get("match_text"),
        reply_text: row.get("reply_text"),
    })
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list_active_bots(&self) -> Result<Vec<BotConfig>> {
        let rows = sqlx::query(&format!(
            "SELECT {BOT_COLUMNS} FROM bots WHERE active = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(bot_from_row).collect())
    }

    async fn get_bot(&self, bot_id: BotId) -> Result<Option<BotConfig>> {
        let row = sqlx::query(&format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = ?"))
            .bind(bot_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(bot_from_row))
    }

    async fn list_buttons(&self, bot_id: BotId) -> Result<Vec<Rule>> {
        self.rules_of(bot_id, RuleKind::Button).await
    }

    async fn list_triggers(&self, bot_id: BotId) -> Result<Vec<Rule>> {
        self.rules_of(bot_id, RuleKind::Trigger).await
    }
}

#[async_trait]
impl BotStore for SqliteStore {
    async fn list_bots(&self) -> Result<Vec<BotConfig>> {
        let rows = sqlx::query(&format!("SELECT {BOT_COLUMNS} FROM bots ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(bot_from_row).collect())
    }

    async fn insert_bot(&self, bot: NewBot) -> Result<BotConfig> {
        let result = sqlx::query(
            "INSERT INTO bots (name, description, token, active) VALUES (?, ?, ?, ?)",
        )
        .bind(&bot.name)
        .bind(&bot.description)
        .bind(bot.token.expose_secret())
        .bind(bot.active)
        .execute(&self.pool)
        .await?;
        self.fetch_bot(BotId(result.last_insert_rowid())).await
    }

    async fn update_bot(&self, bot_id: BotId, update: BotUpdate) -> Result<BotConfig> {
        let result =
            sqlx::query("UPDATE bots SET name = ?, description = ?, token = ? WHERE id = ?")
                .bind(&update.name)
                .bind(&update.description)
                .bind(update.token.expose_secret())
                .bind(bot_id.0)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::bot_not_found(bot_id));
        }
        self.fetch_bot(bot_id).await
    }

    async fn set_active(&self, bot_id: BotId, active: bool) -> Result<BotConfig> {
        let result = sqlx::query("UPDATE bots SET active = ? WHERE id = ?")
            .bind(active)
            .bind(bot_id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::bot_not_found(bot_id));
        }
        self.fetch_bot(bot_id).await
    }

    async fn delete_bot(&self, bot_id: BotId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM rules WHERE bot_id = ?")
            .bind(bot_id.0)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM bots WHERE id = ?")
            .bind(bot_id.0)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::bot_not_found(bot_id));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_rule(&self, rule: NewRule) -> Result<Rule> {
        if self.get_bot(rule.bot_id).await?.is_none() {
            return Err(Error::bot_not_found(rule.bot_id));
        }
        let result = sqlx::query(
            "INSERT INTO rules (bot_id, kind, match_text, reply_text) VALUES (?, ?, ?, ?)",
        )
        .bind(rule.bot_id.0)
        .bind(rule.kind.as_str())
        .bind(&rule.match_text)
        .bind(&rule.reply_text)
        .execute(&self.pool)
        .await?;
        Ok(Rule {
            id: result.last_insert_rowid(),
            bot_id: rule.bot_id,
            kind: rule.kind,
            match_text: rule.match_text,
            reply_text: rule.reply_text,
        })
    }

    async fn delete_rule(&self, rule_id: i64) -> Result<Rule> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?"))
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::rule_not_found(rule_id))?;
        let rule = rule_from_row(&row)?;
        sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(rule)
    }
}
