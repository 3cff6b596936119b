//! Bot worker lifecycle.
//!
//! The [`Supervisor`] owns one polling worker per active bot and keeps a
//! registry of them; the [`Reconciler`] periodically diffs that registry
//! against the store. [`BotAdmin`] is the write path used by operators.

pub mod admin;
pub mod error;
pub mod reconciler;
mod registry;
pub mod state;
pub mod supervisor;
mod worker;

pub use {
    admin::{AdminOutcome, BotAdmin, DeferredLifecycle, Lifecycle},
    error::{Error, Result},
    reconciler::Reconciler,
    state::{BotStatus, Fault, WorkerState},
    supervisor::{ReconcileReport, StartOutcome, StopOutcome, Supervisor, SupervisorOptions},
};
