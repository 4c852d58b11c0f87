//! Sports statistics synchronization service.
//!
//! Pulls team, player, and game data for MLB, WNBA, and NFL from
//! Tank01-style provider APIs and idempotently reconciles it into a local
//! SQLite database. Records are matched by natural key; runs are safe to
//! repeat and safe to run concurrently per sport.
//!
//! The pipeline: `client` fetches raw pages, `normalize` maps them into
//! typed records using the per-sport `registry`, `reconcile` applies the
//! minimal writes, and `coordinator` ties the stages together with
//! batching and cancellation.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod registry;

pub use client::{ApiClient, RetryPolicy};
pub use config::Config;
pub use coordinator::{cancel_channel, Coordinator, RunOptions};
pub use error::{Result, SyncError};
pub use models::{RunOutcome, RunState, SportId};
pub use reconcile::{Reconciler, SyncStore};
