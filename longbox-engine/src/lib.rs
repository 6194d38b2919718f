//! longbox-engine library interface
//!
//! Reconciles a comic library folder against the file registry, creates and
//! links series, and matches series across metadata sources.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod providers;
pub mod services;
pub mod sources;
pub mod store;
pub mod workflow;

pub use crate::config::EngineConfig;
pub use crate::error::{ReconcileError, ReconcileResult};
pub use crate::store::{MemoryStore, SqliteStore, Store, StoreError};
pub use crate::workflow::{ReconcileControl, ReconcileOrchestrator, ReconcileSummary};
