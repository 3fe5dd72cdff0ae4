//! # Estrategias de Ejecución
//! src/strategy/mod.rs
//!
//! Una estrategia recibe la unidad de trabajo y la `Completion` del request,
//! y se compromete a completarla exactamente una vez con el resultado. Lo que
//! cambia entre estrategias es *dónde* ocurre la espera:
//!
//! | Estrategia       | Dónde espera                          | Bloquea el loop |
//! |------------------|---------------------------------------|-----------------|
//! | `InlineBlocking` | en el thread del loop                 | sí              |
//! | `PoolOffload`    | en un thread del `WorkerPool`         | no              |
//! | `FiberSuspend`   | en un fiber suspendido (sin thread)   | no              |
//! | `TimerAsync`     | en el heap de timers del loop         | no              |
//!
//! `execute` siempre corre en el thread del loop y debe retornar sin esperar,
//! salvo `InlineBlocking`, que existe justamente para mostrar el problema.

pub mod fiber;
pub mod inline;
pub mod pool;
pub mod timer;

pub use fiber::FiberSuspend;
pub use inline::InlineBlocking;
pub use pool::PoolOffload;
pub use timer::TimerAsync;

use crate::dispatcher::Completion;
use crate::error::WorkOutcome;
use std::fmt;
use std::time::Duration;

/// Las cuatro formas de ejecutar la operación bloqueante
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyKind {
    InlineBlocking,
    PoolOffload,
    FiberSuspend,
    TimerAsync,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::TimerAsync,
        StrategyKind::InlineBlocking,
        StrategyKind::PoolOffload,
        StrategyKind::FiberSuspend,
    ];

    /// Texto que va en el body de la respuesta y en el header `X-Strategy`
    pub fn identifier(&self) -> &'static str {
        match self {
            StrategyKind::InlineBlocking => "InlineBlocking",
            StrategyKind::PoolOffload => "PoolOffload",
            StrategyKind::FiberSuspend => "FiberSuspend",
            StrategyKind::TimerAsync => "TimerAsync",
        }
    }

    /// Puerto por defecto del listener de cada estrategia
    pub fn default_port(&self) -> u16 {
        match self {
            StrategyKind::TimerAsync => 8000,
            StrategyKind::InlineBlocking => 8001,
            StrategyKind::PoolOffload => 8002,
            StrategyKind::FiberSuspend => 8003,
        }
    }

    /// Si la espera ocurre en el thread del loop
    pub fn blocks_loop(&self) -> bool {
        matches!(self, StrategyKind::InlineBlocking)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Unidad de trabajo simulada: una espera fija que representa cualquier
/// llamada bloqueante, seguida del string de resultado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedWork {
    pub delay: Duration,
    pub output: String,
}

impl SimulatedWork {
    pub fn new(delay: Duration, output: impl Into<String>) -> Self {
        Self {
            delay,
            output: output.into(),
        }
    }

    /// Ejecuta la espera bloqueando el thread actual
    pub fn perform_blocking(self) -> WorkOutcome {
        std::thread::sleep(self.delay);
        Ok(self.output)
    }
}

/// Forma de ejecutar una unidad de trabajo y entregar su resultado
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Ejecuta `work` y completa `completion` con el resultado.
    ///
    /// Se llama desde el thread del loop. `completion` se mueve al contexto
    /// que termine el trabajo; ese contexto es el único dueño del request.
    fn execute(&self, work: SimulatedWork, completion: Completion);
}
