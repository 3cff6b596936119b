//! Process-wide record of running workers.
//!
//! One `std::sync::Mutex` guards every map here and is never held across an
//! `.await`. Per-bot operation locks are handed out as owned `Arc`s so callers
//! can serialize `start`/`stop` for one bot without blocking the others.
//!
//! A bot whose token was rejected keeps a mark holding the rejected config.
//! Reconciliation leaves it alone until the token changes or an operator
//! starts it explicitly.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use {
    botpanel_common::{BotConfig, BotId},
    tokio::{sync::watch, task::AbortHandle},
    tokio_util::sync::CancellationToken,
};

use crate::state::{BotStatus, Fault, WorkerState};

/// Runtime record of one spawned worker.
pub(crate) struct WorkerHandle {
    /// Config snapshot the worker was started with.
    pub bot: BotConfig,
    /// Distinguishes successive workers for the same bot.
    pub generation: u64,
    pub cancel: CancellationToken,
    pub state: watch::Receiver<WorkerState>,
    pub abort: AbortHandle,
    pub started_at: Instant,
    /// Set once the worker confirmed `Running`.
    pub live: bool,
}

impl WorkerHandle {
    /// True once the task is gone or has published a terminal state.
    fn has_exited(&self) -> bool {
        self.state.borrow().is_terminal() || self.abort.is_finished()
    }

    fn is_serving(&self) -> bool {
        self.live && *self.state.borrow() == WorkerState::Running && !self.abort.is_finished()
    }

    fn status(&self) -> BotStatus {
        if !self.live {
            return BotStatus::Starting;
        }
        BotStatus::from(&*self.state.borrow())
    }
}

/// What `stop` needs to shut a worker down without holding the registry.
pub(crate) struct StopControl {
    pub generation: u64,
    pub cancel: CancellationToken,
    pub state: watch::Receiver<WorkerState>,
    pub abort: AbortHandle,
    pub started_at: Instant,
}

#[derive(Default)]
struct RegistryState {
    workers: HashMap<BotId, WorkerHandle>,
    locks: HashMap<BotId, Arc<tokio::sync::Mutex<()>>>,
    last_exit: HashMap<BotId, BotStatus>,
    rejected: HashMap<BotId, BotConfig>,
    next_generation: u64,
}

impl RegistryState {
    fn prune(&mut self, bot_id: BotId) {
        let Some(handle) = self.workers.remove(&bot_id) else {
            return;
        };
        let exit = handle.state.borrow().clone();
        if exit.is_terminal() {
            self.record_exit(&handle.bot, &exit);
        } else {
            self.last_exit.insert(bot_id, BotStatus::Faulted);
        }
    }

    fn record_exit(&mut self, bot: &BotConfig, exit: &WorkerState) {
        self.last_exit.insert(bot.id, BotStatus::from(exit));
        if let WorkerState::Faulted(Fault::Credential(_)) = exit {
            self.rejected.insert(bot.id, bot.clone());
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    inner: Mutex<RegistryState>,
}

impl Registry {
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Operation lock for `bot_id`, created on first use.
    pub fn op_lock(&self, bot_id: BotId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.state().locks.entry(bot_id).or_default())
    }

    /// Drop the operation lock for `bot_id` once nobody holds it.
    pub fn release_op_lock(&self, bot_id: BotId) {
        let mut state = self.state();
        if state
            .locks
            .get(&bot_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            state.locks.remove(&bot_id);
        }
    }

    #[cfg(test)]
    pub fn op_lock_count(&self) -> usize {
        self.state().locks.len()
    }

    pub fn next_generation(&self) -> u64 {
        let mut state = self.state();
        state.next_generation += 1;
        state.next_generation
    }

    pub fn insert(&self, handle: WorkerHandle) {
        let mut state = self.state();
        state.last_exit.remove(&handle.bot.id);
        state.workers.insert(handle.bot.id, handle);
    }

    pub fn contains(&self, bot_id: BotId) -> bool {
        self.state().workers.contains_key(&bot_id)
    }

    /// Flag the worker as confirmed. Fails if the entry was removed or
    /// replaced in the meantime.
    pub fn mark_live(&self, bot_id: BotId, generation: u64) -> bool {
        match self.state().workers.get_mut(&bot_id) {
            Some(handle) if handle.generation == generation => {
                handle.live = true;
                true
            },
            _ => false,
        }
    }

    /// Remove the entry only if it still belongs to `generation`, recording
    /// `exit` as the bot's last state.
    pub fn remove_if_generation(&self, bot_id: BotId, generation: u64, exit: &WorkerState) -> bool {
        let mut state = self.state();
        if !state
            .workers
            .get(&bot_id)
            .is_some_and(|h| h.generation == generation)
        {
            return false;
        }
        match state.workers.remove(&bot_id) {
            Some(handle) => {
                state.record_exit(&handle.bot, exit);
                true
            },
            None => false,
        }
    }

    /// Drop the entry for `bot_id` if its worker has already exited.
    pub fn prune_if_exited(&self, bot_id: BotId) -> bool {
        let mut state = self.state();
        let exited = state
            .workers
            .get(&bot_id)
            .is_some_and(WorkerHandle::has_exited);
        if exited {
            state.prune(bot_id);
        }
        exited
    }

    /// Drop every entry whose worker has exited; returns the pruned IDs.
    pub fn prune_exited(&self) -> Vec<BotId> {
        let mut state = self.state();
        let mut dead: Vec<BotId> = state
            .workers
            .iter()
            .filter(|(_, h)| h.has_exited())
            .map(|(id, _)| *id)
            .collect();
        dead.sort();
        for id in &dead {
            state.prune(*id);
        }
        dead
    }

    /// Whether `bot` carries the same token that was last rejected for it.
    pub fn is_rejected(&self, bot: &BotConfig) -> bool {
        self.state()
            .rejected
            .get(&bot.id)
            .is_some_and(|rejected| rejected.same_credential(bot))
    }

    /// Forget a credential rejection so the next start tries again.
    pub fn clear_rejected(&self, bot_id: BotId) -> bool {
        self.state().rejected.remove(&bot_id).is_some()
    }

    pub fn stop_control(&self, bot_id: BotId) -> Option<StopControl> {
        self.state().workers.get(&bot_id).map(|h| StopControl {
            generation: h.generation,
            cancel: h.cancel.clone(),
            state: h.state.clone(),
            abort: h.abort.clone(),
            started_at: h.started_at,
        })
    }

    /// Config and generation of every registered worker.
    pub fn snapshot(&self) -> HashMap<BotId, (BotConfig, u64)> {
        self.state()
            .workers
            .iter()
            .map(|(id, h)| (*id, (h.bot.clone(), h.generation)))
            .collect()
    }

    pub fn generation(&self, bot_id: BotId) -> Option<u64> {
        self.state().workers.get(&bot_id).map(|h| h.generation)
    }

    pub fn ids(&self) -> Vec<BotId> {
        let mut ids: Vec<BotId> = self.state().workers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn live_ids(&self) -> Vec<BotId> {
        let mut ids: Vec<BotId> = self
            .state()
            .workers
            .iter()
            .filter(|(_, h)| h.is_serving())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn status(&self, bot_id: BotId) -> BotStatus {
        let state = self.state();
        match state.workers.get(&bot_id) {
            Some(handle) => handle.status(),
            None => state
                .last_exit
                .get(&bot_id)
                .copied()
                .unwrap_or(BotStatus::Unknown),
        }
    }
}
