//! # Fibers
//! src/fiber/mod.rs
//!
//! Threads livianos con stack propio que se suspenden sin ocupar un thread
//! del SO. Permiten escribir el trabajo en estilo secuencial
//! (`ctx.sleep(...)?; Ok(...)`) mientras el carrier atiende otros fibers.
//!
//! - `stack`: corrutina de un fiber y su contexto de suspensión
//! - `scheduler`: carriers, timers de fibers e interrupciones

pub mod scheduler;
pub mod stack;

pub use scheduler::{FiberHandle, FiberScheduler, FiberStats};
pub use stack::{current_fiber, FiberContext, DEFAULT_STACK_SIZE};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identificador único de fiber dentro del proceso
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    pub fn next() -> Self {
        FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber-{}", self.0)
    }
}
