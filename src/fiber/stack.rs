//! # Corrutinas de Fibers
//! src/fiber/stack.rs
//!
//! Cada fiber corre como una corrutina stackful de corosensei con su propio
//! stack. Suspenderse guarda el punto de continuación en ese stack y devuelve
//! el control al carrier, que queda libre para correr otros fibers.
//!
//! El protocolo entre fiber y carrier tiene dos direcciones:
//! - `Suspend`: lo que el fiber pide al suspenderse (dormir, ceder el turno).
//! - `Wake`: con qué motivo lo reanuda el carrier.

use super::FiberId;
use crate::error::{WorkError, WorkOutcome};
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// Tamaño de stack por defecto de cada fiber
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Pedido del fiber al suspenderse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspend {
    /// Dormir sin ocupar el carrier
    Sleep(Duration),
    /// Ceder el turno y volver a la cola de listos
    Yield,
}

/// Motivo con el que el carrier reanuda al fiber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Primera ejecución
    Start,
    /// Venció la espera
    Elapsed,
    /// Vuelve de un `yield_now`
    Resumed,
    /// La espera fue interrumpida
    Interrupted,
}

/// Cuerpo de un fiber, escrito en estilo secuencial
pub type FiberBody = Box<dyn FnOnce(&FiberContext<'_>) -> WorkOutcome + Send + 'static>;

thread_local! {
    /// Fiber que está corriendo en este carrier
    static CURRENT_FIBER: Cell<Option<FiberId>> = const { Cell::new(None) };
}

/// Id del fiber que corre en el thread actual, si hay uno
pub fn current_fiber() -> Option<FiberId> {
    CURRENT_FIBER.with(|c| c.get())
}

/// Contexto que recibe el cuerpo del fiber para suspenderse
pub struct FiberContext<'a> {
    id: FiberId,
    yielder: &'a Yielder<Wake, Suspend>,
}

impl FiberContext<'_> {
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Duerme `duration` sin bloquear el carrier.
    ///
    /// Retorna `Err(WorkError::Interrupted)` si alguien interrumpe al fiber
    /// mientras está suspendido.
    pub fn sleep(&self, duration: Duration) -> Result<(), WorkError> {
        self.suspend(Suspend::Sleep(duration))
    }

    /// Cede el carrier a otros fibers listos
    pub fn yield_now(&self) -> Result<(), WorkError> {
        self.suspend(Suspend::Yield)
    }

    fn suspend(&self, request: Suspend) -> Result<(), WorkError> {
        let wake = self.yielder.suspend(request);
        // Otro fiber pudo correr en este thread mientras estábamos suspendidos
        CURRENT_FIBER.with(|c| c.set(Some(self.id)));
        match wake {
            Wake::Interrupted => Err(WorkError::Interrupted),
            Wake::Start | Wake::Elapsed | Wake::Resumed => Ok(()),
        }
    }
}

/// Resultado de reanudar un fiber
#[derive(Debug)]
pub enum Step {
    Suspended(Suspend),
    Finished(WorkOutcome),
}

/// Corrutina de un fiber. Es `!Send`: vive en el carrier que la creó.
pub struct FiberCoroutine {
    id: FiberId,
    coro: Coroutine<Wake, Suspend, WorkOutcome>,
}

impl FiberCoroutine {
    pub fn new(id: FiberId, body: FiberBody, stack_size: usize) -> std::io::Result<Self> {
        let stack = DefaultStack::new(stack_size)?;

        let coro = Coroutine::with_stack(stack, move |yielder: &Yielder<Wake, Suspend>, _start: Wake| {
            let ctx = FiberContext { id, yielder };
            catch_unwind(AssertUnwindSafe(|| body(&ctx)))
                .unwrap_or_else(|payload| Err(WorkError::from_panic(payload)))
        });

        Ok(Self { id, coro })
    }

    /// Reanuda el fiber hasta su próxima suspensión o hasta que termine
    pub fn resume(&mut self, wake: Wake) -> Step {
        CURRENT_FIBER.with(|c| c.set(Some(self.id)));
        let result = self.coro.resume(wake);
        CURRENT_FIBER.with(|c| c.set(None));

        match result {
            CoroutineResult::Yield(request) => Step::Suspended(request),
            CoroutineResult::Return(outcome) => Step::Finished(outcome),
        }
    }

    pub fn done(&self) -> bool {
        self.coro.done()
    }
}

impl std::fmt::Debug for FiberCoroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberCoroutine")
            .field("id", &self.id)
            .field("done", &self.done())
            .finish()
    }
}
