//! Shared doubles for the supervisor integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    botpanel_channels::{
        ButtonClick, Connection, Connector, CredentialProbe, Error as TransportError, InboundEvent,
        InboundMessage, Result as TransportResult,
    },
    botpanel_common::{BotConfig, BotId, Rule, RuleKind},
    botpanel_rules::{
        BotStore, BotUpdate, NewBot, NewRule, Result as StoreResult, RuleStore, store_memory::InMemoryStore,
    },
    botpanel_supervisor::SupervisorOptions,
    secrecy::Secret,
    tokio::sync::mpsc,
};

/// How the mock transport treats a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Normal,
    /// `connect` fails with a credential error.
    RejectCredential,
    /// `connect` never returns.
    HangOnConnect,
    /// `close` never returns.
    HangOnClose,
    /// Every `send` and edit fails.
    FailSends,
    /// Every `send` and edit never returns.
    HangOnSend,
}

/// Something to feed into a live mock connection.
pub enum Script {
    Event(InboundEvent),
    Fail(TransportError),
}

#[derive(Default)]
struct MockState {
    behaviors: HashMap<BotId, Behavior>,
    attempts: HashMap<BotId, usize>,
    connects: HashMap<BotId, usize>,
    closes: HashMap<BotId, usize>,
    feeds: HashMap<BotId, mpsc::UnboundedSender<Script>>,
    send_attempts: usize,
    sent: Vec<(BotId, i64, String)>,
    edits: Vec<(BotId, String, String)>,
}

/// Scripted in-process transport.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_behavior(&self, bot_id: BotId, behavior: Behavior) {
        self.state().behaviors.insert(bot_id, behavior);
    }

    /// `connect` calls, successful or not.
    pub fn attempts(&self, bot_id: BotId) -> usize {
        self.state().attempts.get(&bot_id).copied().unwrap_or(0)
    }

    /// Connections handed out.
    pub fn connects(&self, bot_id: BotId) -> usize {
        self.state().connects.get(&bot_id).copied().unwrap_or(0)
    }

    pub fn closes(&self, bot_id: BotId) -> usize {
        self.state().closes.get(&bot_id).copied().unwrap_or(0)
    }

    /// Connections opened and not yet closed.
    pub fn open(&self, bot_id: BotId) -> usize {
        self.connects(bot_id) - self.closes(bot_id)
    }

    /// Feed the most recent connection for `bot_id`.
    pub fn push(&self, bot_id: BotId, script: Script) {
        let feed = self.state().feeds.get(&bot_id).cloned().expect("bot has a connection");
        feed.send(script).expect("connection still receiving");
    }

    pub fn push_message(&self, bot_id: BotId, chat_id: i64, text: &str) {
        self.push(
            bot_id,
            Script::Event(InboundEvent::Message(InboundMessage {
                chat_id,
                text: text.into(),
                username: Some("alice".into()),
            })),
        );
    }

    pub fn push_click(&self, bot_id: BotId, data: &str) {
        self.push(
            bot_id,
            Script::Event(InboundEvent::ButtonClick(ButtonClick {
                callback_id: "cb".into(),
                data: data.into(),
                chat_id: Some(42),
                message_id: Some(7),
            })),
        );
    }

    pub fn send_attempts(&self) -> usize {
        self.state().send_attempts
    }

    pub fn sent(&self) -> Vec<(BotId, i64, String)> {
        self.state().sent.clone()
    }

    pub fn edits(&self) -> Vec<(BotId, String, String)> {
        self.state().edits.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, bot: &BotConfig) -> TransportResult<Box<dyn Connection>> {
        let behavior = {
            let mut state = self.state();
            *state.attempts.entry(bot.id).or_default() += 1;
            state.behaviors.get(&bot.id).copied().unwrap_or_default()
        };
        match behavior {
            Behavior::RejectCredential => return Err(TransportError::credential("Unauthorized")),
            Behavior::HangOnConnect => std::future::pending::<()>().await,
            _ => {},
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        *state.connects.entry(bot.id).or_default() += 1;
        state.feeds.insert(bot.id, tx);
        Ok(Box::new(MockConnection {
            bot_id: bot.id,
            feed: rx,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    bot_id: BotId,
    feed: mpsc::UnboundedReceiver<Script>,
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn behavior(&self) -> Behavior {
        let state = self.state.lock().unwrap();
        state.behaviors.get(&self.bot_id).copied().unwrap_or_default()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn bot_id(&self) -> BotId {
        self.bot_id
    }

    async fn receive_next(&mut self) -> TransportResult<InboundEvent> {
        match self.feed.recv().await {
            Some(Script::Event(event)) => Ok(event),
            Some(Script::Fail(err)) => Err(err),
            None => std::future::pending().await,
        }
    }

    async fn send(&mut self, chat_id: i64, text: &str) -> TransportResult<()> {
        let behavior = self.behavior();
        if behavior == Behavior::HangOnSend {
            self.state.lock().unwrap().send_attempts += 1;
            std::future::pending::<()>().await;
        }
        let failing = behavior == Behavior::FailSends;
        let mut state = self.state.lock().unwrap();
        state.send_attempts += 1;
        if failing {
            return Err(TransportError::send("Forbidden: bot was blocked by the user"));
        }
        state.sent.push((self.bot_id, chat_id, text.to_string()));
        Ok(())
    }

    async fn edit_last_with_text(&mut self, click: &ButtonClick, text: &str) -> TransportResult<()> {
        let behavior = self.behavior();
        if behavior == Behavior::HangOnSend {
            self.state.lock().unwrap().send_attempts += 1;
            std::future::pending::<()>().await;
        }
        let failing = behavior == Behavior::FailSends;
        let mut state = self.state.lock().unwrap();
        state.send_attempts += 1;
        if failing {
            return Err(TransportError::send("message to edit not found"));
        }
        state
            .edits
            .push((self.bot_id, click.data.clone(), text.to_string()));
        Ok(())
    }

    async fn close(&mut self) {
        if self.behavior() == Behavior::HangOnClose {
            std::future::pending::<()>().await;
        }
        *self.state.lock().unwrap().closes.entry(self.bot_id).or_default() += 1;
    }
}

/// Credential probe with a switchable live check.
#[derive(Default)]
pub struct MockProbe {
    pub reject: bool,
    pub probes: AtomicUsize,
}

#[async_trait]
impl CredentialProbe for MockProbe {
    fn check_format(&self, token: &str) -> Result<(), String> {
        match token.split_once(':') {
            Some((digits, rest))
                if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) && !rest.is_empty() =>
            {
                Ok(())
            },
            _ => Err("Invalid token format".into()),
        }
    }

    async fn probe(&self, _token: &Secret<String>) -> TransportResult<String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            Err(TransportError::credential("Unauthorized"))
        } else {
            Ok("@mock_bot".into())
        }
    }
}

/// Store wrapper whose `list_active_bots` can be made to fail.
pub struct FlakyStore {
    pub inner: Arc<InMemoryStore>,
    pub fail_loads: AtomicUsize,
    pub loads: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>, fail_loads: usize) -> Self {
        Self {
            inner,
            fail_loads: AtomicUsize::new(fail_loads),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuleStore for FlakyStore {
    async fn list_active_bots(&self) -> StoreResult<Vec<BotConfig>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_loads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_loads.store(remaining - 1, Ordering::SeqCst);
            return Err(botpanel_rules::Error::message("database is locked"));
        }
        self.inner.list_active_bots().await
    }

    async fn get_bot(&self, bot_id: BotId) -> StoreResult<Option<BotConfig>> {
        self.inner.get_bot(bot_id).await
    }

    async fn list_buttons(&self, bot_id: BotId) -> StoreResult<Vec<Rule>> {
        self.inner.list_buttons(bot_id).await
    }

    async fn list_triggers(&self, bot_id: BotId) -> StoreResult<Vec<Rule>> {
        self.inner.list_triggers(bot_id).await
    }
}

/// Short timings so the suite runs fast.
pub fn options() -> SupervisorOptions {
    SupervisorOptions {
        reconcile_interval: Duration::from_millis(50),
        error_backoff: Duration::from_millis(400),
        start_timeout: Duration::from_millis(300),
        stop_timeout: Duration::from_millis(300),
        receive_retry: Duration::from_millis(20),
    }
}

pub fn new_bot(name: &str) -> NewBot {
    NewBot {
        name: name.into(),
        description: None,
        token: Secret::new(format!("1000:{name}")),
        active: true,
    }
}

pub async fn seed_bot(store: &InMemoryStore, name: &str) -> BotConfig {
    store.insert_bot(new_bot(name)).await.unwrap()
}

pub async fn seed_rule(store: &InMemoryStore, bot_id: BotId, kind: RuleKind, match_text: &str, reply: &str) -> Rule {
    store
        .insert_rule(NewRule {
            bot_id,
            kind,
            match_text: match_text.into(),
            reply_text: reply.into(),
        })
        .await
        .unwrap()
}

pub async fn rotate_token(store: &InMemoryStore, bot: &BotConfig, token: &str) -> BotConfig {
    store
        .update_bot(bot.id, BotUpdate {
            name: bot.name.clone(),
            description: bot.description.clone(),
            token: Secret::new(token.into()),
        })
        .await
        .unwrap()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
