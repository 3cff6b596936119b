use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    botpanel_channels::Connector,
    botpanel_common::{BotConfig, BotId},
    botpanel_config::SupervisorConfig,
    botpanel_rules::RuleStore,
    futures::future::join_all,
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{Error, Result},
    registry::{Registry, StopControl, WorkerHandle},
    state::{BotStatus, Fault, WorkerState},
    worker::Worker,
};

/// Timings used by the supervisor and its reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub reconcile_interval: Duration,
    pub error_backoff: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub receive_retry: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for SupervisorOptions {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
            error_backoff: Duration::from_secs(config.error_backoff_secs),
            start_timeout: Duration::from_secs(config.start_timeout_secs),
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
            receive_retry: Duration::from_secs(config.receive_retry_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new worker confirmed it is polling.
    Started,
    /// A worker for this bot was already registered.
    AlreadyRunning,
    /// The bot is deactivated; nothing was started.
    Inactive,
    /// Left to the serving process's next reconcile pass.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    /// Left to the serving process's next reconcile pass.
    Deferred,
}

/// What one reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<BotId>,
    pub stopped: Vec<BotId>,
    pub restarted: Vec<BotId>,
    pub failed: Vec<(BotId, String)>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty()
            && self.stopped.is_empty()
            && self.restarted.is_empty()
            && self.failed.is_empty()
    }
}

/// A reconcile decision. `Stop` and `Restart` carry the generation they
/// were decided against and are skipped if another operation replaced that
/// worker first.
enum Action {
    Start(BotConfig),
    Stop(BotId, u64),
    Restart(BotConfig, u64),
}

enum Change {
    Started,
    Stopped,
    Restarted,
}

/// Owns the worker registry and every start/stop decision.
pub struct Supervisor {
    connector: Arc<dyn Connector>,
    rules: Arc<dyn RuleStore>,
    options: SupervisorOptions,
    registry: Arc<Registry>,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        rules: Arc<dyn RuleStore>,
        options: SupervisorOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            rules,
            options,
            registry: Arc::new(Registry::default()),
        })
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Start every given bot concurrently.
    pub async fn initialize(&self, bots: &[BotConfig]) -> ReconcileReport {
        let results = join_all(bots.iter().map(|bot| async move { (bot.id, self.start(bot).await) })).await;

        let mut report = ReconcileReport::default();
        for (bot_id, result) in results {
            match result {
                Ok(StartOutcome::Started) => report.started.push(bot_id),
                Ok(_) => {},
                Err(e) => report.failed.push((bot_id, e.to_string())),
            }
        }
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            total = bots.len(),
            "bots initialized"
        );
        report
    }

    /// Start a worker for `bot` unless one is already registered.
    ///
    /// An explicit start also retries a bot whose token was rejected before.
    pub async fn start(&self, bot: &BotConfig) -> Result<StartOutcome> {
        self.clear_rejected(bot.id);
        let lock = self.registry.op_lock(bot.id);
        let result = {
            let _guard = lock.lock().await;
            self.start_locked(bot).await
        };
        self.release_op_lock(bot.id, lock);
        result
    }

    /// Stop the worker for `bot_id`, if any.
    pub async fn stop(&self, bot_id: BotId) -> Result<StopOutcome> {
        let lock = self.registry.op_lock(bot_id);
        let result = {
            let _guard = lock.lock().await;
            self.stop_locked(bot_id).await
        };
        self.release_op_lock(bot_id, lock);
        result
    }

    /// Stop then start, without letting another operation on the same bot in
    /// between. A forced stop does not prevent the new start.
    pub async fn restart(&self, bot: &BotConfig) -> Result<StartOutcome> {
        self.clear_rejected(bot.id);
        let lock = self.registry.op_lock(bot.id);
        let result = {
            let _guard = lock.lock().await;
            self.restart_locked(bot).await
        };
        self.release_op_lock(bot.id, lock);
        result
    }

    fn clear_rejected(&self, bot_id: BotId) {
        if self.registry.clear_rejected(bot_id) {
            info!(%bot_id, event = "credential_retry", "retrying bot after rejected token");
        }
    }

    fn release_op_lock(&self, bot_id: BotId, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        self.registry.release_op_lock(bot_id);
    }

    async fn restart_locked(&self, bot: &BotConfig) -> Result<StartOutcome> {
        match self.stop_locked(bot.id).await {
            Ok(_) => {},
            Err(e @ Error::ForcedStop { .. }) => {
                warn!(bot_id = %bot.id, error = %e, "continuing restart after forced stop");
            },
            Err(e) => return Err(e),
        }
        self.start_locked(bot).await
    }

    /// Converge the registry onto `desired`.
    ///
    /// Inactive entries in `desired` are treated as absent. A bot whose token
    /// was rejected is left down until its token changes or it is started
    /// explicitly. Failures are collected per bot and never abort the pass.
    pub async fn reconcile(&self, desired: &[BotConfig]) -> ReconcileReport {
        for bot_id in self.registry.prune_exited() {
            warn!(%bot_id, event = "worker_pruned", "dropped registry entry for exited worker");
        }

        let current = self.registry.snapshot();
        let wanted: HashSet<BotId> = desired.iter().filter(|b| b.active).map(|b| b.id).collect();

        let mut actions = Vec::new();
        for bot in desired.iter().filter(|b| b.active) {
            match current.get(&bot.id) {
                None if self.registry.is_rejected(bot) => {
                    debug!(bot_id = %bot.id, event = "start_skipped", reason = "credential_rejected", "token was rejected, waiting for a new one");
                },
                None => actions.push(Action::Start(bot.clone())),
                Some((running, generation)) if !running.same_credential(bot) => {
                    actions.push(Action::Restart(bot.clone(), *generation));
                },
                Some(_) => {},
            }
        }
        let mut stale: Vec<(BotId, u64)> = current
            .iter()
            .filter(|(id, _)| !wanted.contains(*id))
            .map(|(id, (_, generation))| (*id, *generation))
            .collect();
        stale.sort();
        actions.extend(
            stale
                .into_iter()
                .map(|(bot_id, generation)| Action::Stop(bot_id, generation)),
        );

        let mut report = ReconcileReport::default();
        if actions.is_empty() {
            return report;
        }

        let results = join_all(actions.into_iter().map(|action| self.apply(action))).await;
        for (bot_id, result) in results {
            match result {
                Ok(Some(Change::Started)) => report.started.push(bot_id),
                Ok(Some(Change::Stopped)) => report.stopped.push(bot_id),
                Ok(Some(Change::Restarted)) => report.restarted.push(bot_id),
                Ok(None) => {},
                Err(e) => {
                    warn!(%bot_id, event = "reconcile_failed", error = %e, "reconcile action failed");
                    report.failed.push((bot_id, e.to_string()));
                },
            }
        }
        report
    }

    /// Run one reconcile action under the bot's operation lock; `None` means
    /// it turned out to be a no-op.
    async fn apply(&self, action: Action) -> (BotId, Result<Option<Change>>) {
        let bot_id = match &action {
            Action::Start(bot) | Action::Restart(bot, _) => bot.id,
            Action::Stop(bot_id, _) => *bot_id,
        };
        let lock = self.registry.op_lock(bot_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_locked(action).await
        };
        self.release_op_lock(bot_id, lock);
        (bot_id, result)
    }

    async fn apply_locked(&self, action: Action) -> Result<Option<Change>> {
        match action {
            Action::Start(bot) => {
                let outcome = self.start_locked(&bot).await?;
                Ok((outcome == StartOutcome::Started).then_some(Change::Started))
            },
            Action::Stop(bot_id, generation) => {
                if self.registry.generation(bot_id) != Some(generation) {
                    debug!(%bot_id, event = "stop_skipped", reason = "replaced", "worker changed since the pass began");
                    return Ok(None);
                }
                let outcome = self.stop_locked(bot_id).await?;
                Ok((outcome == StopOutcome::Stopped).then_some(Change::Stopped))
            },
            Action::Restart(bot, generation) => {
                if self.registry.generation(bot.id) != Some(generation) {
                    debug!(bot_id = %bot.id, event = "restart_skipped", reason = "replaced", "worker changed since the pass began");
                    return Ok(None);
                }
                info!(bot_id = %bot.id, event = "credential_changed", "restarting worker with new token");
                let outcome = self.restart_locked(&bot).await?;
                Ok((outcome == StartOutcome::Started).then_some(Change::Restarted))
            },
        }
    }

    pub fn status(&self, bot_id: BotId) -> BotStatus {
        self.registry.status(bot_id)
    }

    /// IDs of bots whose worker confirmed it is polling.
    pub fn running_bots(&self) -> Vec<BotId> {
        self.registry.live_ids()
    }

    /// Stop every registered worker concurrently.
    pub async fn shutdown(&self) {
        let ids = self.registry.ids();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "stopping all workers");
        let results = join_all(ids.iter().map(|id| self.stop(*id))).await;
        for (bot_id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(%bot_id, error = %e, "worker did not stop cleanly");
            }
        }
    }

    async fn start_locked(&self, bot: &BotConfig) -> Result<StartOutcome> {
        let bot_id = bot.id;
        if !bot.active {
            info!(%bot_id, event = "start_skipped", reason = "inactive", "bot is not active");
            return Ok(StartOutcome::Inactive);
        }
        if self.registry.prune_if_exited(bot_id) {
            debug!(%bot_id, "pruned exited worker before start");
        }
        if self.registry.contains(bot_id) {
            info!(%bot_id, event = "start_skipped", reason = "running", "bot already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        info!(%bot_id, name = %bot.name, event = "worker_starting", "starting worker");
        let generation = self.registry.next_generation();
        let cancel = CancellationToken::new();
        let (worker, mut state) = Worker::new(
            bot.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.rules),
            cancel.clone(),
            self.options.receive_retry,
        );

        let registry = Arc::clone(&self.registry);
        let task = tokio::spawn(async move {
            let exit = worker.run().await;
            if let WorkerState::Faulted(fault) = &exit
                && registry.remove_if_generation(bot_id, generation, &exit)
            {
                debug!(%bot_id, fault = %fault, "faulted worker left the registry");
            }
        });
        let abort = task.abort_handle();
        self.registry.insert(WorkerHandle {
            bot: bot.clone(),
            generation,
            cancel: cancel.clone(),
            state: state.clone(),
            abort: abort.clone(),
            started_at: Instant::now(),
            live: false,
        });

        let timeout = self.options.start_timeout;
        let observed = match tokio::time::timeout(timeout, wait_started(&mut state)).await {
            Ok(observed) => observed,
            Err(_) => {
                cancel.cancel();
                abort.abort();
                let exit = WorkerState::Faulted(Fault::Transport(format!(
                    "no start confirmation within {timeout:?}"
                )));
                self.registry.remove_if_generation(bot_id, generation, &exit);
                error!(%bot_id, event = "start_timeout", ?timeout, "worker did not confirm start");
                return Err(Error::start_timeout(bot_id, timeout));
            },
        };

        match observed {
            Some(WorkerState::Running) if self.registry.mark_live(bot_id, generation) => {
                info!(%bot_id, event = "worker_started", "worker running");
                Ok(StartOutcome::Started)
            },
            Some(WorkerState::Faulted(Fault::Credential(message))) => {
                let exit = WorkerState::Faulted(Fault::Credential(message.clone()));
                self.registry.remove_if_generation(bot_id, generation, &exit);
                error!(%bot_id, event = "credential_rejected", error = %message, "bot token rejected");
                Err(Error::credential(bot_id, message))
            },
            other => {
                let message = match other {
                    Some(state) => format!("worker ended during startup ({state})"),
                    None => "worker task ended during startup".to_string(),
                };
                let exit = WorkerState::Faulted(Fault::Transport(message.clone()));
                self.registry.remove_if_generation(bot_id, generation, &exit);
                error!(%bot_id, event = "start_failed", error = %message, "worker failed to start");
                Err(Error::worker_faulted(bot_id, message))
            },
        }
    }

    async fn stop_locked(&self, bot_id: BotId) -> Result<StopOutcome> {
        let Some(StopControl {
            generation,
            cancel,
            mut state,
            abort,
            started_at,
        }) = self.registry.stop_control(bot_id)
        else {
            debug!(%bot_id, event = "stop_skipped", "bot not running");
            return Ok(StopOutcome::NotRunning);
        };

        info!(%bot_id, event = "worker_stopping", uptime = ?started_at.elapsed(), "stopping worker");
        cancel.cancel();

        let timeout = self.options.stop_timeout;
        match tokio::time::timeout(timeout, wait_terminal(&mut state)).await {
            Ok(exit) => {
                self.registry.remove_if_generation(bot_id, generation, &exit);
                info!(%bot_id, event = "worker_stopped", exit = %exit, "worker stopped");
                Ok(StopOutcome::Stopped)
            },
            Err(_) => {
                abort.abort();
                self.registry
                    .remove_if_generation(bot_id, generation, &WorkerState::Stopped);
                warn!(%bot_id, event = "forced_stop", ?timeout, "worker did not stop in time, task aborted");
                Err(Error::forced_stop(bot_id, timeout))
            },
        }
    }
}

/// Wait until the worker is polling or has ended. `None` means the task
/// dropped its state sender without reaching either.
async fn wait_started(state: &mut watch::Receiver<WorkerState>) -> Option<WorkerState> {
    state
        .wait_for(|s| *s == WorkerState::Running || s.is_terminal())
        .await
        .ok()
        .map(|s| (*s).clone())
}

/// Wait for the worker's final state. A closed channel means the task is
/// gone without publishing one, which counts as stopped.
async fn wait_terminal(state: &mut watch::Receiver<WorkerState>) -> WorkerState {
    state
        .wait_for(WorkerState::is_terminal)
        .await
        .map(|s| (*s).clone())
        .unwrap_or(WorkerState::Stopped)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        botpanel_channels::{Connection, Error as TransportError, Result as TransportResult},
        botpanel_rules::store_memory::InMemoryStore,
        secrecy::Secret,
    };

    struct Offline;

    #[async_trait]
    impl Connector for Offline {
        async fn connect(&self, _bot: &BotConfig) -> TransportResult<Box<dyn Connection>> {
            Err(TransportError::fatal("offline"))
        }
    }

    fn bot(id: i64) -> BotConfig {
        BotConfig {
            id: BotId(id),
            token: Secret::new(format!("{id}:token")),
            name: format!("bot-{id}"),
            description: None,
            active: true,
        }
    }

    /// Register a worker whose task is parked and whose last published state
    /// is `state`.
    fn register(supervisor: &Supervisor, id: i64, state: WorkerState) -> watch::Sender<WorkerState> {
        let (tx, rx) = watch::channel(state);
        let task = tokio::spawn(std::future::pending::<()>());
        let generation = supervisor.registry.next_generation();
        supervisor.registry.insert(WorkerHandle {
            bot: bot(id),
            generation,
            cancel: CancellationToken::new(),
            state: rx,
            abort: task.abort_handle(),
            started_at: Instant::now(),
            live: true,
        });
        tx
    }

    fn supervisor() -> Arc<Supervisor> {
        Supervisor::new(Arc::new(Offline), Arc::new(InMemoryStore::new()), SupervisorOptions {
            stop_timeout: Duration::from_millis(100),
            ..SupervisorOptions::default()
        })
    }

    #[tokio::test]
    async fn stop_keeps_fault_seen_while_stopping() {
        let supervisor = supervisor();
        let _tx = register(
            &supervisor,
            1,
            WorkerState::Faulted(Fault::Transport("terminated by other getUpdates".into())),
        );

        assert_eq!(supervisor.stop(BotId(1)).await.unwrap(), StopOutcome::Stopped);
        assert_eq!(supervisor.status(BotId(1)), BotStatus::Faulted);
    }

    #[tokio::test]
    async fn stop_records_clean_exit() {
        let supervisor = supervisor();
        let tx = register(&supervisor, 1, WorkerState::Running);
        tx.send_replace(WorkerState::Stopped);

        assert_eq!(supervisor.stop(BotId(1)).await.unwrap(), StopOutcome::Stopped);
        assert_eq!(supervisor.status(BotId(1)), BotStatus::Stopped);
    }

    #[tokio::test]
    async fn operation_locks_are_released_after_use() {
        let supervisor = supervisor();
        let _tx = register(&supervisor, 1, WorkerState::Stopped);
        supervisor.stop(BotId(1)).await.unwrap();
        assert!(supervisor.start(&bot(2)).await.is_err());

        assert_eq!(supervisor.registry.op_lock_count(), 0);
    }

    #[tokio::test]
    async fn reconcile_skips_worker_replaced_after_snapshot() {
        let supervisor = supervisor();
        let _old = register(&supervisor, 1, WorkerState::Running);
        let stale = supervisor.registry.generation(BotId(1)).unwrap();
        let _new = register(&supervisor, 1, WorkerState::Running);

        let mut rotated = bot(1);
        rotated.token = Secret::new("1:rotated".into());
        let (bot_id, result) = supervisor.apply(Action::Restart(rotated, stale)).await;
        assert_eq!(bot_id, BotId(1));
        assert!(result.unwrap().is_none());

        let (_, result) = supervisor.apply(Action::Stop(BotId(1), stale)).await;
        assert!(result.unwrap().is_none());
        assert!(supervisor.registry.contains(BotId(1)));
    }
}
