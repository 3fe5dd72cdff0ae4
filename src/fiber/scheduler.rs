//! # Scheduler de Fibers
//! src/fiber/scheduler.rs
//!
//! Multiplexa fibers sobre un número fijo de carriers (threads del SO).
//!
//! ## Diseño
//!
//! Las corrutinas de corosensei son `!Send`, así que un fiber no puede migrar
//! de thread. El scheduler lo resuelve así:
//!
//! 1. `run_in_fiber` arma un `FiberTask` (cuerpo + continuación), que sí es
//!    `Send`, y lo reparte round-robin entre los carriers.
//! 2. Cada carrier crea la corrutina localmente y la ejecuta. Un fiber que
//!    duerme queda estacionado en la tabla del carrier con un timer armado en
//!    la cola de timers del propio carrier.
//! 3. El carrier espera en su canal usando como deadline el próximo timer, de
//!    modo que un fiber dormido no ocupa ningún thread.
//! 4. Cuando vence el timer (o llega una interrupción) el fiber pasa a la cola
//!    de listos y se reanuda justo después de la llamada que lo suspendió.
//!
//! La continuación corre en el carrier cuando el cuerpo termina; es la que
//! postea al event loop para escribir la respuesta.

use super::stack::{FiberBody, FiberContext, FiberCoroutine, Step, Suspend, Wake, DEFAULT_STACK_SIZE};
use super::FiberId;
use crate::error::{ServerError, WorkError, WorkOutcome};
use crate::event_loop::{TimerId, TimerQueue};
use crate::workers::pool::Continuation;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Rondas de interrupción al apagar antes de dar un fiber por perdido
const SHUTDOWN_ROUNDS: usize = 64;

/// Trabajo enviado a un carrier: {cuerpo del fiber, continuación}
struct FiberTask {
    id: FiberId,
    body: FiberBody,
    continuation: Continuation,
}

enum CarrierMessage {
    Spawn(FiberTask),
    Interrupt(FiberId),
    Shutdown,
}

/// Contadores compartidos por todos los carriers
#[derive(Default)]
struct SchedulerCounters {
    active: AtomicUsize,
    sleeping: AtomicUsize,
    resumes: AtomicU64,
    completed: AtomicU64,
    interrupted: AtomicU64,
}

/// Snapshot de los contadores del scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiberStats {
    pub carriers: usize,
    /// Fibers creados que aún no terminaron
    pub active: usize,
    /// Fibers estacionados esperando un timer
    pub sleeping: usize,
    pub resumes: u64,
    pub completed: u64,
    pub interrupted: u64,
}

struct CarrierHandle {
    tx: Sender<CarrierMessage>,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Handle de un fiber en ejecución
#[derive(Clone)]
pub struct FiberHandle {
    id: FiberId,
    tx: Sender<CarrierMessage>,
}

impl FiberHandle {
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Interrumpe al fiber si está suspendido.
    ///
    /// El fiber observa `Err(WorkError::Interrupted)` al volver de su
    /// suspensión. Si ya terminó, la interrupción se ignora.
    pub fn interrupt(&self) -> bool {
        self.tx.send(CarrierMessage::Interrupt(self.id)).is_ok()
    }
}

impl std::fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberHandle").field("id", &self.id).finish()
    }
}

/// Scheduler cooperativo de fibers
pub struct FiberScheduler {
    carriers: Vec<CarrierHandle>,
    next_carrier: AtomicUsize,
    counters: Arc<SchedulerCounters>,
}

impl FiberScheduler {
    /// Crea el scheduler con `carriers` threads llamados `carrier-N`
    pub fn new(carriers: usize) -> Result<Self, ServerError> {
        Self::with_stack_size(carriers, DEFAULT_STACK_SIZE)
    }

    pub fn with_stack_size(carriers: usize, stack_size: usize) -> Result<Self, ServerError> {
        if carriers == 0 {
            return Err(ServerError::InvalidConfig("fiber scheduler needs at least 1 carrier".to_string()));
        }

        let counters = Arc::new(SchedulerCounters::default());
        let mut handles = Vec::with_capacity(carriers);

        for index in 0..carriers {
            let (tx, rx) = crossbeam_channel::unbounded();
            let name = format!("carrier-{}", index);
            let carrier_name = name.clone();
            let carrier_counters = Arc::clone(&counters);

            // El carrier guarda corrutinas (`!Send`): se construye dentro de su thread
            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || Carrier::new(carrier_name, rx, stack_size, carrier_counters).run())
                .map_err(|source| ServerError::Spawn { name, source })?;

            handles.push(CarrierHandle { tx, join: Mutex::new(Some(join)) });
        }

        debug!(carriers, stack_size, "fiber scheduler started");

        Ok(Self {
            carriers: handles,
            next_carrier: AtomicUsize::new(0),
            counters,
        })
    }

    /// Arranca `body` en un fiber. `continuation` recibe el resultado en el
    /// carrier, exactamente una vez.
    pub fn run_in_fiber<B, C>(&self, body: B, continuation: C) -> FiberHandle
    where
        B: FnOnce(&FiberContext<'_>) -> WorkOutcome + Send + 'static,
        C: FnOnce(WorkOutcome) + Send + 'static,
    {
        let id = FiberId::next();
        let index = self.next_carrier.fetch_add(1, Ordering::Relaxed) % self.carriers.len();
        let carrier = &self.carriers[index];

        let task = FiberTask {
            id,
            body: Box::new(body),
            continuation: Box::new(continuation),
        };

        self.counters.active.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = carrier.tx.send(CarrierMessage::Spawn(task)) {
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            if let CarrierMessage::Spawn(task) = err.into_inner() {
                warn!(fiber = %id, "spawn on a stopped fiber scheduler");
                run_continuation(task.continuation, Err(WorkError::Abandoned));
            }
        }

        FiberHandle { id, tx: carrier.tx.clone() }
    }

    pub fn carriers(&self) -> usize {
        self.carriers.len()
    }

    pub fn stats(&self) -> FiberStats {
        FiberStats {
            carriers: self.carriers.len(),
            active: self.counters.active.load(Ordering::SeqCst),
            sleeping: self.counters.sleeping.load(Ordering::SeqCst),
            resumes: self.counters.resumes.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            interrupted: self.counters.interrupted.load(Ordering::SeqCst),
        }
    }

    /// Detiene los carriers. Los fibers que siguen suspendidos se reanudan
    /// con `Interrupted` para que todas las continuaciones corran.
    pub fn shutdown(&self) {
        for carrier in &self.carriers {
            let _ = carrier.tx.send(CarrierMessage::Shutdown);
        }
        for carrier in &self.carriers {
            if let Some(join) = carrier.join.lock().take() {
                if join.join().is_err() {
                    error!("carrier thread panicked during shutdown");
                }
            }
        }
    }
}

impl Drop for FiberScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for FiberScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberScheduler").field("stats", &self.stats()).finish()
    }
}

// ---------------------------------------------------------------------------
// Carrier
// ---------------------------------------------------------------------------

/// Fiber vivo en la tabla de un carrier
struct ParkedFiber {
    coro: FiberCoroutine,
    continuation: Continuation,
    /// Timer armado mientras duerme
    timer: Option<TimerId>,
    /// Motivo de la próxima reanudación; `Some` mientras está en la cola de listos
    wake: Option<Wake>,
}

struct Carrier {
    name: String,
    rx: Receiver<CarrierMessage>,
    stack_size: usize,
    fibers: FxHashMap<FiberId, ParkedFiber>,
    ready: VecDeque<FiberId>,
    timers: TimerQueue<FiberId>,
    counters: Arc<SchedulerCounters>,
}

impl Carrier {
    fn new(name: String, rx: Receiver<CarrierMessage>, stack_size: usize, counters: Arc<SchedulerCounters>) -> Self {
        Self {
            name,
            rx,
            stack_size,
            fibers: FxHashMap::default(),
            ready: VecDeque::new(),
            timers: TimerQueue::new(),
            counters,
        }
    }

    fn run(mut self) {
        debug!(carrier = %self.name, "carrier started");

        loop {
            // Solo el lote actual: un fiber que cede en bucle no monopoliza el canal
            for _ in 0..self.ready.len() {
                if let Some(id) = self.ready.pop_front() {
                    self.resume(id);
                }
            }

            let now = std::time::Instant::now();
            while let Some((_, id)) = self.timers.pop_expired(now) {
                self.counters.sleeping.fetch_sub(1, Ordering::SeqCst);
                if let Some(fiber) = self.fibers.get_mut(&id) {
                    fiber.timer = None;
                }
                self.wake(id, Wake::Elapsed);
            }

            let message = if !self.ready.is_empty() {
                match self.rx.try_recv() {
                    Ok(message) => Some(message),
                    Err(TryRecvError::Empty) => continue,
                    Err(TryRecvError::Disconnected) => None,
                }
            } else if let Some(deadline) = self.timers.next_deadline() {
                match self.rx.recv_deadline(deadline) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            } else {
                self.rx.recv().ok()
            };

            match message {
                Some(CarrierMessage::Spawn(task)) => self.start(task),
                Some(CarrierMessage::Interrupt(id)) => self.interrupt(id),
                Some(CarrierMessage::Shutdown) | None => break,
            }
        }

        self.finish_remaining();
        debug!(carrier = %self.name, "carrier stopped");
    }

    fn start(&mut self, task: FiberTask) {
        match FiberCoroutine::new(task.id, task.body, self.stack_size) {
            Ok(coro) => {
                self.fibers.insert(
                    task.id,
                    ParkedFiber {
                        coro,
                        continuation: task.continuation,
                        timer: None,
                        wake: Some(Wake::Start),
                    },
                );
                self.ready.push_back(task.id);
            }
            Err(err) => {
                error!(carrier = %self.name, fiber = %task.id, %err, "failed to allocate fiber stack");
                self.counters.active.fetch_sub(1, Ordering::SeqCst);
                run_continuation(task.continuation, Err(WorkError::Unavailable(err.to_string())));
            }
        }
    }

    /// Marca al fiber como listo. Una suspensión se reanuda a lo sumo una vez:
    /// si ya tiene un motivo pendiente, solo una interrupción lo reemplaza.
    ///
    /// Retorna `true` si `reason` quedó como el motivo de la reanudación.
    fn wake(&mut self, id: FiberId, reason: Wake) -> bool {
        let Some(fiber) = self.fibers.get_mut(&id) else {
            return false;
        };
        match fiber.wake {
            None => {
                fiber.wake = Some(reason);
                self.ready.push_back(id);
                true
            }
            // Un fiber que no arrancó todavía no tiene suspensión que interrumpir
            Some(current) if reason == Wake::Interrupted && current != Wake::Start && current != reason => {
                fiber.wake = Some(reason);
                true
            }
            Some(_) => false,
        }
    }

    fn interrupt(&mut self, id: FiberId) {
        let Some(fiber) = self.fibers.get_mut(&id) else {
            debug!(carrier = %self.name, fiber = %id, "interrupt for a finished fiber ignored");
            return;
        };
        if let Some(timer) = fiber.timer.take() {
            if self.timers.cancel(timer) {
                self.counters.sleeping.fetch_sub(1, Ordering::SeqCst);
            }
        }
        if self.wake(id, Wake::Interrupted) {
            self.counters.interrupted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn resume(&mut self, id: FiberId) {
        let Some(mut fiber) = self.fibers.remove(&id) else {
            return;
        };
        let wake = fiber.wake.take().unwrap_or(Wake::Resumed);
        self.counters.resumes.fetch_add(1, Ordering::SeqCst);

        match fiber.coro.resume(wake) {
            Step::Suspended(Suspend::Sleep(duration)) => {
                fiber.timer = Some(self.timers.arm_after(duration, id));
                self.counters.sleeping.fetch_add(1, Ordering::SeqCst);
                self.fibers.insert(id, fiber);
            }
            Step::Suspended(Suspend::Yield) => {
                fiber.wake = Some(Wake::Resumed);
                self.fibers.insert(id, fiber);
                self.ready.push_back(id);
            }
            Step::Finished(outcome) => {
                self.counters.active.fetch_sub(1, Ordering::SeqCst);
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                run_continuation(fiber.continuation, outcome);
            }
        }
    }

    /// Reanuda con `Interrupted` a todo fiber que quede hasta que terminen
    fn finish_remaining(&mut self) {
        for _ in 0..SHUTDOWN_ROUNDS {
            if self.fibers.is_empty() {
                return;
            }
            let ids: Vec<_> = self.fibers.keys().copied().collect();
            for id in ids {
                self.interrupt(id);
            }
            while let Some(id) = self.ready.pop_front() {
                self.resume(id);
            }
        }

        for (id, fiber) in self.fibers.drain() {
            error!(carrier = %self.name, fiber = %id, "fiber ignored shutdown interrupts; abandoning it");
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            // Soltar una corrutina suspendida desenrolla su stack; se evita
            // dejándola filtrada y entregando el fallo a la continuación.
            std::mem::forget(fiber.coro);
            run_continuation(fiber.continuation, Err(WorkError::Abandoned));
        }
    }
}

fn run_continuation(continuation: Continuation, outcome: WorkOutcome) {
    if catch_unwind(AssertUnwindSafe(move || continuation(outcome))).is_err() {
        error!("fiber continuation panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_zero_carriers_rejected() {
        assert!(matches!(FiberScheduler::new(0), Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn test_fiber_result_reaches_continuation() {
        let scheduler = FiberScheduler::new(1).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        scheduler.run_in_fiber(|_ctx| Ok("hello".to_string()), move |o| tx.send(o).unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Ok("hello".to_string()));
    }

    #[test]
    fn test_token_round_trips_through_suspension() {
        let scheduler = FiberScheduler::new(2).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();

        for i in 0..8u32 {
            let tx = tx.clone();
            scheduler.run_in_fiber(
                move |ctx| {
                    let token = format!("token-{}-{}", i, ctx.id().as_u64());
                    ctx.sleep(Duration::from_millis(20))?;
                    // Continúa justo después de la suspensión, con sus locales intactos
                    Ok(format!("{}|after-sleep", token))
                },
                move |o| tx.send((i, o)).unwrap(),
            );
        }

        for _ in 0..8 {
            let (i, outcome) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            let value = outcome.unwrap();
            assert!(value.starts_with(&format!("token-{}-", i)), "got {}", value);
            assert!(value.ends_with("|after-sleep"));
        }
    }

    #[test]
    fn test_sleeping_fibers_do_not_hold_the_carrier() {
        // Un solo carrier: si dormir bloqueara el thread, 20 fibers tardarían 20x
        let scheduler = FiberScheduler::new(1).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let start = Instant::now();

        for _ in 0..20 {
            let tx = tx.clone();
            scheduler.run_in_fiber(
                |ctx| {
                    ctx.sleep(Duration::from_millis(200))?;
                    Ok(String::new())
                },
                move |o| tx.send(o).unwrap(),
            );
        }

        thread::sleep(Duration::from_millis(80));
        assert_eq!(scheduler.stats().sleeping, 20);

        for _ in 0..20 {
            assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_ok());
        }
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(800), "took {:?}", elapsed);
        assert_eq!(scheduler.stats().active, 0);
    }

    #[test]
    fn test_interrupt_is_observed_by_resumed_fiber() {
        let scheduler = FiberScheduler::new(1).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let handle = scheduler.run_in_fiber(
            |ctx| match ctx.sleep(Duration::from_secs(30)) {
                Err(WorkError::Interrupted) => Ok("saw interrupt".to_string()),
                Err(other) => Err(other),
                Ok(()) => Ok("slept".to_string()),
            },
            move |o| tx.send(o).unwrap(),
        );

        thread::sleep(Duration::from_millis(50));
        assert!(handle.interrupt());

        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(outcome, Ok("saw interrupt".to_string()));
        assert_eq!(scheduler.stats().interrupted, 1);
        assert_eq!(scheduler.stats().sleeping, 0);
    }

    #[test]
    fn test_interrupt_after_completion_is_ignored() {
        let scheduler = FiberScheduler::new(1).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();

        let handle = scheduler.run_in_fiber(|_ctx| Ok("done".to_string()), move |o| tx.send(o).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Ok("done".to_string()));

        handle.interrupt();
        // La continuación no vuelve a correr
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(scheduler.stats().interrupted, 0);
    }

    fn carrier_with_task(body: FiberBody) -> (Carrier, FiberId, crossbeam_channel::Receiver<WorkOutcome>) {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let counters = Arc::new(SchedulerCounters::default());
        let mut carrier = Carrier::new("carrier-test".to_string(), rx, DEFAULT_STACK_SIZE, counters);

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let id = FiberId::next();
        carrier.counters.active.fetch_add(1, Ordering::SeqCst);
        carrier.start(FiberTask {
            id,
            body,
            continuation: Box::new(move |o| done_tx.send(o).unwrap()),
        });
        (carrier, id, done_rx)
    }

    #[test]
    fn test_interrupt_before_start_is_not_counted() {
        let (mut carrier, id, done) = carrier_with_task(Box::new(|_ctx| Ok("ran".to_string())));

        carrier.interrupt(id);
        assert_eq!(carrier.counters.interrupted.load(Ordering::SeqCst), 0);

        // Arranca normalmente: la interrupción no tenía suspensión que cortar
        carrier.resume(id);
        assert_eq!(done.try_recv().unwrap(), Ok("ran".to_string()));
    }

    #[test]
    fn test_repeated_interrupt_counts_once() {
        let (mut carrier, id, done) = carrier_with_task(Box::new(|ctx| match ctx.yield_now() {
            Err(WorkError::Interrupted) => Ok("interrupted".to_string()),
            Err(other) => Err(other),
            Ok(()) => Ok("resumed".to_string()),
        }));

        // Primer paso: el fiber cede y queda listo con `Resumed`
        let first = carrier.ready.pop_front().unwrap();
        carrier.resume(first);

        carrier.interrupt(id);
        carrier.interrupt(id);
        assert_eq!(carrier.counters.interrupted.load(Ordering::SeqCst), 1);

        while let Some(next) = carrier.ready.pop_front() {
            carrier.resume(next);
        }
        assert_eq!(done.try_recv().unwrap(), Ok("interrupted".to_string()));
    }

    #[test]
    fn test_yield_now_lets_other_fibers_run() {
        let scheduler = FiberScheduler::new(1).unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = crossbeam_channel::unbounded();

        for name in ['a', 'b'] {
            let started = Arc::clone(&started);
            let order = Arc::clone(&order);
            let tx = tx.clone();
            scheduler.run_in_fiber(
                move |ctx| {
                    // Cede hasta que los dos fibers estén en la cola de listos
                    started.fetch_add(1, Ordering::SeqCst);
                    while started.load(Ordering::SeqCst) < 2 {
                        ctx.yield_now()?;
                    }
                    for _ in 0..3 {
                        order.lock().push(name);
                        ctx.yield_now()?;
                    }
                    Ok(String::new())
                },
                move |o| tx.send(o).unwrap(),
            );
        }

        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        }
        let order = order.lock();
        assert_eq!(order.len(), 6);
        // En el mismo carrier los dos fibers se alternan
        assert!(order.windows(2).all(|w| w[0] != w[1]), "order: {:?}", *order);
    }

    #[test]
    fn test_shutdown_interrupts_sleeping_fibers() {
        let scheduler = FiberScheduler::new(1).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        scheduler.run_in_fiber(
            |ctx| {
                ctx.sleep(Duration::from_secs(60))?;
                Ok("slept".to_string())
            },
            move |o| tx.send(o).unwrap(),
        );
        thread::sleep(Duration::from_millis(50));
        scheduler.shutdown();

        assert_eq!(rx.recv_timeout(Duration::from_millis(100)).unwrap(), Err(WorkError::Interrupted));
    }

    #[test]
    fn test_spawn_after_shutdown_is_abandoned() {
        let scheduler = FiberScheduler::new(1).unwrap();
        scheduler.shutdown();

        let (tx, rx) = crossbeam_channel::bounded(1);
        scheduler.run_in_fiber(|_ctx| Ok("never".to_string()), move |o| tx.send(o).unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_millis(100)).unwrap(), Err(WorkError::Abandoned));
    }
}
