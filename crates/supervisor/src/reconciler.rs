//! Periodic diff-and-correct pass over the worker registry.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    botpanel_rules::RuleStore,
    tokio::{sync::Notify, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::Result,
    supervisor::{ReconcileReport, Supervisor, SupervisorOptions},
};

/// Background task that keeps the registry in line with the store.
///
/// Each tick loads the active bots and hands them to
/// [`Supervisor::reconcile`]. When loading fails the next wait is
/// `error_backoff` instead of the interval, for that tick only.
pub struct Reconciler {
    supervisor: Arc<Supervisor>,
    store: Arc<dyn RuleStore>,
    interval: Duration,
    error_backoff: Duration,
    cancel: CancellationToken,
    wake_notify: Arc<Notify>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn new(
        supervisor: Arc<Supervisor>,
        store: Arc<dyn RuleStore>,
        options: &SupervisorOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            supervisor,
            store,
            interval: options.reconcile_interval,
            error_backoff: options.error_backoff,
            cancel: CancellationToken::new(),
            wake_notify: Arc::new(Notify::new()),
            timer_handle: Mutex::new(None),
        })
    }

    /// Spawn the timer loop. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.timer_handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            this.timer_loop().await;
        }));
        info!(interval = ?self.interval, "reconciler started");
    }

    /// Run the next pass now instead of waiting for the timer.
    pub fn trigger(&self) {
        self.wake_notify.notify_one();
    }

    /// One reconcile pass. Errors only when the store cannot be read.
    pub async fn tick(&self) -> Result<ReconcileReport> {
        let desired = self.store.list_active_bots().await?;
        Ok(self.supervisor.reconcile(&desired).await)
    }

    /// Cancel the loop and wait for an in-flight pass to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .timer_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "reconciler task ended abnormally");
        }
        info!("reconciler stopped");
    }

    async fn timer_loop(&self) {
        let mut delay = self.interval;
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {},
                () = self.wake_notify.notified() => {
                    debug!("reconciler woken by trigger");
                },
            }

            delay = match self.tick().await {
                Ok(report) => {
                    if report.is_noop() {
                        debug!("reconcile pass: nothing to do");
                    } else {
                        info!(
                            started = ?report.started,
                            stopped = ?report.stopped,
                            restarted = ?report.restarted,
                            failed = report.failed.len(),
                            "reconcile pass applied changes"
                        );
                    }
                    self.interval
                },
                Err(e) => {
                    warn!(event = "reconcile_load_failed", error = %e, backoff = ?self.error_backoff, "could not load bots");
                    self.error_backoff
                },
            };
        }
    }
}
