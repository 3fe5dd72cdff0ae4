//! # Sistema de Workers
//! src/workers/mod.rs
//!
//! Pool compartido de threads bloqueantes usado por la estrategia PoolOffload.

pub mod pool;

pub use pool::{PoolStats, WorkItem, WorkerPool};
