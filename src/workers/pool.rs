//! # Pool de Workers
//! src/workers/pool.rs
//!
//! Pool de tamaño fijo de threads del SO para trabajo bloqueante. Cada worker
//! saca un `WorkItem` de la cola compartida, ejecuta la unidad de trabajo hasta
//! el final y luego invoca la continuación con el resultado. La continuación es
//! quien postea de vuelta al event loop; el pool no conoce el loop.
//!
//! ## Backpressure
//!
//! La cola es ilimitada: si todos los workers están ocupados, los envíos se
//! acumulan. Es un riesgo conocido; por ahora solo se emite un `warn!` cuando
//! el backlog cruza `backlog_warn`. Una variante de producción debería acotar
//! la cola y rechazar con 503.

use crate::error::{ServerError, WorkError, WorkOutcome};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Unidad de trabajo bloqueante
pub type WorkFn = Box<dyn FnOnce() -> WorkOutcome + Send + 'static>;

/// Continuación que recibe el resultado, exactamente una vez
pub type Continuation = Box<dyn FnOnce(WorkOutcome) + Send + 'static>;

/// Trabajo enviado al pool: {unidad de trabajo, continuación}
pub struct WorkItem {
    work: WorkFn,
    continuation: Continuation,
    submitted_at: Instant,
}

impl WorkItem {
    pub fn new<W, C>(work: W, continuation: C) -> Self
    where
        W: FnOnce() -> WorkOutcome + Send + 'static,
        C: FnOnce(WorkOutcome) + Send + 'static,
    {
        Self {
            work: Box::new(work),
            continuation: Box::new(continuation),
            submitted_at: Instant::now(),
        }
    }

    /// Ejecuta el trabajo capturando panics y entrega el resultado
    fn run(self, worker: &str) -> bool {
        let WorkItem {
            work,
            continuation,
            submitted_at,
        } = self;
        let waited = submitted_at.elapsed();
        let outcome = catch_unwind(AssertUnwindSafe(work))
            .unwrap_or_else(|payload| Err(WorkError::from_panic(payload)));
        let ok = outcome.is_ok();

        debug!(worker, ?waited, ok, "work item finished");
        complete(continuation, outcome, worker);
        ok
    }
}

/// Invoca la continuación aislando un posible panic
fn complete(continuation: Continuation, outcome: WorkOutcome, worker: &str) {
    if catch_unwind(AssertUnwindSafe(move || continuation(outcome))).is_err() {
        error!(worker, "work continuation panicked");
    }
}

/// Contadores del pool
#[derive(Default)]
struct PoolCounters {
    queued: AtomicUsize,
    busy: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot de los contadores del pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub queued: usize,
    pub busy: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Pool de tamaño fijo de threads bloqueantes
pub struct WorkerPool {
    size: usize,
    backlog_warn: usize,
    tx: Mutex<Option<Sender<WorkItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Crea el pool y arranca `size` workers llamados `worker-N`
    pub fn new(size: usize, backlog_warn: usize) -> Result<Self, ServerError> {
        if size == 0 {
            return Err(ServerError::InvalidConfig("worker pool needs at least 1 thread".to_string()));
        }

        let (tx, rx) = crossbeam_channel::unbounded::<WorkItem>();
        let counters = Arc::new(PoolCounters::default());
        let mut workers = Vec::with_capacity(size);

        for i in 0..size {
            let name = format!("worker-{}", i);
            let rx = rx.clone();
            let counters = Arc::clone(&counters);
            let thread_name = name.clone();

            let join = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(name, rx, counters))
                .map_err(|source| ServerError::Spawn { name: thread_name, source })?;
            workers.push(join);
        }

        debug!(size, "worker pool started");

        Ok(Self {
            size,
            backlog_warn,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
        })
    }

    /// Encola un trabajo. Nunca bloquea.
    ///
    /// Si el pool ya fue apagado, la continuación se invoca en el thread
    /// actual con `WorkError::Abandoned`.
    pub fn submit(&self, item: WorkItem) {
        let rejected = {
            let tx = self.tx.lock();
            match tx.as_ref() {
                Some(tx) => {
                    let queued = self.counters.queued.fetch_add(1, Ordering::SeqCst) + 1;
                    if queued == self.backlog_warn + 1 {
                        warn!(
                            queued,
                            workers = self.size,
                            "worker pool backlog over threshold; submissions keep queueing"
                        );
                    }
                    match tx.send(item) {
                        Ok(()) => None,
                        Err(err) => {
                            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                            Some(err.into_inner())
                        }
                    }
                }
                None => Some(item),
            }
        };

        if let Some(item) = rejected {
            warn!("submit to a stopped worker pool");
            complete(item.continuation, Err(WorkError::Abandoned), "submitter");
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Trabajos encolados que aún no toma ningún worker
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Workers ejecutando trabajo en este momento
    pub fn busy(&self) -> usize {
        self.counters.busy.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.size,
            queued: self.queued(),
            busy: self.busy(),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Cierra la cola y espera a que los workers terminen lo ya encolado
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for join in workers {
            if join.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Loop principal del worker
fn worker_loop(name: String, rx: Receiver<WorkItem>, counters: Arc<PoolCounters>) {
    debug!(worker = %name, "worker started");

    for item in rx.iter() {
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.busy.fetch_add(1, Ordering::SeqCst);

        if item.run(&name) {
            counters.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }

        counters.busy.fetch_sub(1, Ordering::SeqCst);
    }

    debug!(worker = %name, "worker stopped");
}
