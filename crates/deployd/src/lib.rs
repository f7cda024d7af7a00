//! deployd - contract deployment control plane.
//!
//! Wires the submission service, the worker pool, and the maintenance
//! sweeper over one SQLite state store. The binary in `main.rs` is a thin
//! CLI over [`service::DeployService`] plus the `serve` loop.

pub mod config;
pub mod logging;
pub mod service;
pub mod worker;

pub use config::SystemConfig;
pub use service::{DeployService, SubmitRequest};
pub use worker::{spawn_workers, WorkerPool};
