use std::{fmt, str::FromStr};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::error::Error;

/// Opaque bot identifier (the store's row id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotId(pub i64);

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BotId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| Error::parse("bot id", s))
    }
}

/// Snapshot of a registered bot.
///
/// A running worker holds one of these for its whole lifetime; edits only take
/// effect after a restart.
#[derive(Clone)]
pub struct BotConfig {
    pub id: BotId,
    /// Bot API token from @BotFather.
    pub token: Secret<String>,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
}

impl BotConfig {
    /// Whether both configs would open the same transport connection.
    pub fn same_credential(&self, other: &BotConfig) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .field("name", &self.name)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// Which rule table a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Explicit quick-reply option, also resolvable from a button click.
    Button,
    /// Free-text auto-reply.
    Trigger,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Trigger => "trigger",
        }
    }

    /// Maximum length of `match_text` accepted for this kind.
    pub fn max_match_len(self) -> usize {
        match self {
            Self::Button => 100,
            Self::Trigger => 500,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "button" => Ok(Self::Button),
            "trigger" => Ok(Self::Trigger),
            _ => Err(Error::parse("rule kind", s)),
        }
    }
}

/// A `(match_text, reply_text)` pair scoped to one bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub bot_id: BotId,
    pub kind: RuleKind,
    pub match_text: String,
    pub reply_text: String,
}
