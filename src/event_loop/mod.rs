//! # Event Loop
//! src/event_loop/mod.rs
//!
//! Run-loop de un solo thread. Es el único contexto autorizado para tocar el
//! estado que le pertenece (writers de respuesta, heap de timers).
//!
//! ## Contrato
//!
//! - `LoopHandle::post(callback)`: encola un callback desde cualquier thread.
//!   Nunca bloquea al que llama. FIFO por productor, sin orden entre productores.
//! - `EventLoop::run()`: saca y ejecuta callbacks hasta recibir shutdown. Un
//!   callback que hace panic se captura, se registra y el loop sigue.
//! - Ningún callback debe suspenderse: el que necesite esperar delega al
//!   `WorkerPool`, al `FiberScheduler` o a un timer y retorna de inmediato.
//!
//! Los timers viven dentro del loop: mientras espera en su canal, el loop usa
//! como deadline el próximo timer, así que esperar no ocupa ningún thread.

pub mod timer;

pub use timer::{TimerId, TimerQueue};

use crate::error::{ServerError, WorkError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Callback que corre en el thread del loop
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

enum LoopMessage {
    Run(Callback),
    ArmTimer {
        id: TimerId,
        fire_at: Instant,
        callback: Callback,
    },
    CancelTimer(TimerId),
    Shutdown,
}

/// Estado compartido entre el loop y sus handles
struct LoopShared {
    name: String,
    thread_id: OnceLock<ThreadId>,
    callbacks_run: AtomicU64,
    timers_fired: AtomicU64,
    faults: AtomicU64,
}

/// Contadores del loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub callbacks_run: u64,
    pub timers_fired: u64,
    pub faults: u64,
}

/// Handle clonable para postear trabajo al loop desde cualquier thread
#[derive(Clone)]
pub struct LoopHandle {
    tx: Sender<LoopMessage>,
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// Encola `callback` para correr en el thread del loop.
    ///
    /// Retorna `false` si el loop ya terminó; en ese caso el callback se
    /// descarta (y se ejecutan los `Drop` de lo que capturó).
    pub fn post<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(LoopMessage::Run(Box::new(callback)))
    }

    /// Como `post`, pero si el loop ya terminó devuelve el callback para que
    /// el que llama decida dónde correrlo.
    pub fn try_post(&self, callback: Callback) -> Result<(), Callback> {
        match self.tx.send(LoopMessage::Run(callback)) {
            Ok(()) => Ok(()),
            Err(err) => match err.into_inner() {
                LoopMessage::Run(callback) => Err(callback),
                _ => unreachable!("try_post only sends Run messages"),
            },
        }
    }

    /// Arma un timer: `callback` corre en el loop cuando vence `delay`
    pub fn set_timer<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = TimerId::next();
        self.send(LoopMessage::ArmTimer {
            id,
            fire_at: Instant::now() + delay,
            callback: Box::new(callback),
        });
        id
    }

    /// Cancela un timer pendiente (no-op si ya se disparó)
    pub fn cancel_timer(&self, id: TimerId) {
        self.send(LoopMessage::CancelTimer(id));
    }

    /// Verdadero si el thread actual es el thread de este loop
    pub fn is_loop_thread(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            callbacks_run: self.shared.callbacks_run.load(Ordering::Relaxed),
            timers_fired: self.shared.timers_fired.load(Ordering::Relaxed),
            faults: self.shared.faults.load(Ordering::Relaxed),
        }
    }

    fn send(&self, message: LoopMessage) -> bool {
        if self.tx.send(message).is_err() {
            debug!(event_loop = %self.shared.name, "post to a stopped loop discarded");
            return false;
        }
        true
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("name", &self.shared.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Event loop de un solo thread
pub struct EventLoop {
    handle: LoopHandle,
    rx: Receiver<LoopMessage>,
    timers: TimerQueue<Callback>,
}

impl EventLoop {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(LoopShared {
            name: name.to_string(),
            thread_id: OnceLock::new(),
            callbacks_run: AtomicU64::new(0),
            timers_fired: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        });

        Self {
            handle: LoopHandle { tx, shared },
            rx,
            timers: TimerQueue::new(),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Arranca el loop en un thread propio llamado `loop-{name}`
    pub fn spawn(name: &str) -> Result<RunningLoop, ServerError> {
        let event_loop = EventLoop::new(name);
        let handle = event_loop.handle();
        let thread_name = format!("loop-{}", name);

        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || event_loop.run())
            .map_err(|source| ServerError::Spawn { name: thread_name, source })?;

        Ok(RunningLoop { handle, join: Some(join) })
    }

    /// Corre el loop en el thread actual hasta recibir shutdown
    pub fn run(mut self) {
        // Un EventLoop solo se corre una vez, así que el set no puede fallar
        let _ = self.handle.shared.thread_id.set(thread::current().id());
        debug!(event_loop = %self.handle.shared.name, "event loop started");

        loop {
            let now = Instant::now();
            while let Some((_, callback)) = self.timers.pop_expired(now) {
                self.handle.shared.timers_fired.fetch_add(1, Ordering::Relaxed);
                self.invoke(callback);
            }

            let received = match self.timers.next_deadline() {
                Some(deadline) => match self.rx.recv_deadline(deadline) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => None,
                },
                None => self.rx.recv().ok(),
            };

            match received {
                Some(LoopMessage::Run(callback)) => self.invoke(callback),
                Some(LoopMessage::ArmTimer { id, fire_at, callback }) => {
                    self.timers.arm(id, fire_at, callback);
                }
                Some(LoopMessage::CancelTimer(id)) => {
                    if self.timers.cancel(id) {
                        debug!(event_loop = %self.handle.shared.name, %id, "timer cancelled");
                    }
                }
                Some(LoopMessage::Shutdown) | None => break,
            }
        }

        // Lo que ya estaba encolado corre igual, así ninguna respuesta se pierde
        while let Ok(message) = self.rx.try_recv() {
            if let LoopMessage::Run(callback) = message {
                self.invoke(callback);
            }
        }

        let abandoned = self.timers.drain().len();
        if abandoned > 0 {
            warn!(
                event_loop = %self.handle.shared.name,
                abandoned,
                "event loop stopped with pending timers"
            );
        }
        debug!(event_loop = %self.handle.shared.name, "event loop stopped");
    }

    fn invoke(&self, callback: Callback) {
        self.handle.shared.callbacks_run.fetch_add(1, Ordering::Relaxed);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
            self.handle.shared.faults.fetch_add(1, Ordering::Relaxed);
            let fault = WorkError::from_panic(payload);
            error!(event_loop = %self.handle.shared.name, %fault, "loop callback panicked; loop keeps running");
        }
    }
}

/// Loop corriendo en su propio thread
pub struct RunningLoop {
    handle: LoopHandle,
    join: Option<JoinHandle<()>>,
}

impl RunningLoop {
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Pide shutdown y espera al thread. Los callbacks ya encolados corren
    /// antes de que el loop termine.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(join) = self.join.take() {
            self.handle.send(LoopMessage::Shutdown);
            if join.join().is_err() {
                error!(event_loop = %self.handle.name(), "event loop thread panicked");
            }
        }
    }
}

impl Drop for RunningLoop {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
