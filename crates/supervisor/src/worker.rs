//! One bot's polling task.

use std::{sync::Arc, time::Duration};

use {
    botpanel_channels::{ButtonClick, Connection, Connector, InboundEvent, InboundMessage},
    botpanel_common::BotConfig,
    botpanel_rules::{RuleStore, match_reply, resolve_button},
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::state::{Fault, WorkerState};

pub(crate) struct Worker {
    bot: BotConfig,
    connector: Arc<dyn Connector>,
    rules: Arc<dyn RuleStore>,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
    receive_retry: Duration,
}

impl Worker {
    pub fn new(
        bot: BotConfig,
        connector: Arc<dyn Connector>,
        rules: Arc<dyn RuleStore>,
        cancel: CancellationToken,
        receive_retry: Duration,
    ) -> (Self, watch::Receiver<WorkerState>) {
        let (state, rx) = watch::channel(WorkerState::Created);
        let worker = Self {
            bot,
            connector,
            rules,
            cancel,
            state,
            receive_retry,
        };
        (worker, rx)
    }

    fn publish(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    /// Drive the worker to completion and return its final state.
    ///
    /// Once a connection is open it is closed on every exit path before the
    /// terminal state is published.
    pub async fn run(self) -> WorkerState {
        let bot_id = self.bot.id;
        self.publish(WorkerState::Connecting);

        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = self.connector.connect(&self.bot) => Some(result),
        };
        let mut conn = match connected {
            None => {
                debug!(%bot_id, "worker cancelled while connecting");
                self.publish(WorkerState::Stopped);
                return WorkerState::Stopped;
            },
            Some(Ok(conn)) => conn,
            Some(Err(e)) => {
                let fault = Fault::from(&e);
                warn!(%bot_id, event = "connect_failed", error = %e, "worker could not connect");
                let state = WorkerState::Faulted(fault);
                self.publish(state.clone());
                return state;
            },
        };

        self.publish(WorkerState::Running);
        debug!(%bot_id, name = %self.bot.name, "worker polling");

        let fault = self.serve(conn.as_mut()).await;
        if fault.is_none() {
            self.publish(WorkerState::Stopping);
        }
        conn.close().await;

        let state = match fault {
            None => {
                info!(%bot_id, event = "worker_exited", "worker stopped");
                WorkerState::Stopped
            },
            Some(fault) => {
                warn!(%bot_id, event = "worker_faulted", fault = %fault, "worker gave up");
                WorkerState::Faulted(fault)
            },
        };
        self.publish(state.clone());
        state
    }

    /// Receive loop. Returns the fault that ended it, or `None` when cancelled.
    async fn serve(&self, conn: &mut dyn Connection) -> Option<Fault> {
        let bot_id = self.bot.id;
        loop {
            let received = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                received = conn.receive_next() => received,
            };

            match received {
                Ok(event) => {
                    // A reply stuck on the network must not hold up a stop.
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            debug!(%bot_id, event = "dispatch_cancelled", "stop requested mid-dispatch");
                            return None;
                        },
                        () = self.dispatch(conn, event) => {},
                    }
                },
                Err(e) if e.is_fatal() => return Some(Fault::from(&e)),
                Err(e) => {
                    warn!(%bot_id, event = "receive_failed", error = %e, retry_in = ?self.receive_retry, "receive failed, retrying");
                    tokio::select! {
                        () = self.cancel.cancelled() => return None,
                        () = tokio::time::sleep(self.receive_retry) => {},
                    }
                },
            }
        }
    }

    async fn dispatch(&self, conn: &mut dyn Connection, event: InboundEvent) {
        match event {
            InboundEvent::Message(msg) => self.on_message(conn, msg).await,
            InboundEvent::ButtonClick(click) => self.on_click(conn, click).await,
        }
    }

    async fn on_message(&self, conn: &mut dyn Connection, msg: InboundMessage) {
        let bot_id = self.bot.id;
        debug!(%bot_id, chat_id = msg.chat_id, user = ?msg.username, "message received");

        let reply = match match_reply(self.rules.as_ref(), bot_id, &msg.text).await {
            Ok(Some(reply)) if !reply.is_empty() => reply,
            Ok(_) => return,
            Err(e) => {
                warn!(%bot_id, event = "rule_lookup_failed", error = %e, "could not load rules");
                return;
            },
        };

        if let Err(e) = conn.send(msg.chat_id, &reply).await {
            warn!(%bot_id, chat_id = msg.chat_id, event = "send_failed", error = %e, "failed to send reply");
        }
    }

    async fn on_click(&self, conn: &mut dyn Connection, click: ButtonClick) {
        let bot_id = self.bot.id;
        let reply = match resolve_button(self.rules.as_ref(), bot_id, &click.data).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                debug!(%bot_id, data = %click.data, event = "unknown_button", "no button matches click");
                return;
            },
            Err(e) => {
                warn!(%bot_id, event = "rule_lookup_failed", error = %e, "could not load buttons");
                return;
            },
        };

        if let Err(e) = conn.edit_last_with_text(&click, &reply).await {
            warn!(%bot_id, event = "send_failed", error = %e, "failed to answer button click");
        }
    }
}
