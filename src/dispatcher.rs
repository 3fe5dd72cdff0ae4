//! # Despacho de Requests
//! src/dispatcher.rs
//!
//! Liga cada conexión entrante con la estrategia de su listener y garantiza
//! una sola acción terminal (escribir la respuesta) por request.
//!
//! ## Cadena de ownership
//!
//! ```text
//! PendingRequest ──► Responder ──► Arc<Responder> dentro de Completion
//!                                      │
//!                     execute() mueve la Completion al executor
//!                     (worker, fiber, timer o el mismo loop)
//!                                      │
//!                     complete(outcome) ──► post al loop ──► write_once
//! ```
//!
//! En cada traspaso la `Completion` se *mueve*, así que dos contextos nunca
//! son dueños del mismo request a la vez. El `Responder` además reclama un
//! `AtomicBool` antes de escribir: un segundo intento se rechaza y se cuenta.
//!
//! Si una `Completion` se descarta sin completarse (continuación perdida,
//! panic en el executor, loop detenido con timers pendientes), su `Drop`
//! responde con `WorkError::Abandoned`. El `Drop` del `Responder` cubre el
//! último caso posible: un callback de escritura que se perdió en la cola.

use crate::error::{WorkError, WorkOutcome};
use crate::event_loop::LoopHandle;
use crate::http::{Response, StatusCode};
use crate::metrics::MetricsCollector;
use crate::strategy::{ExecutionStrategy, SimulatedWork, StrategyKind};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Destino de la respuesta de un request
pub trait ResponseSink: Send {
    /// Escribe la respuesta completa y cierra el lado de escritura
    fn write_response(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Descripción para logs (por ejemplo la dirección del cliente)
    fn peer(&self) -> String {
        "unknown".to_string()
    }
}

impl ResponseSink for TcpStream {
    fn write_response(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()?;
        // HTTP/1.0 sin keep-alive: el cliente lee hasta EOF
        self.shutdown(Shutdown::Write)
    }

    fn peer(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "disconnected".to_string())
    }
}

/// Request admitido que espera su respuesta
pub struct PendingRequest {
    id: u64,
    strategy: StrategyKind,
    received_at: Instant,
    sink: Box<dyn ResponseSink>,
}

impl PendingRequest {
    pub fn new(strategy: StrategyKind, sink: impl ResponseSink + 'static) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            strategy,
            received_at: Instant::now(),
            sink: Box::new(sink),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("strategy", &self.strategy)
            .field("peer", &self.sink.peer())
            .finish()
    }
}

/// Escritor de respuesta con guard de una sola escritura
pub struct Responder {
    id: u64,
    strategy: StrategyKind,
    received_at: Instant,
    sink: Mutex<Option<Box<dyn ResponseSink>>>,
    written: AtomicBool,
    metrics: MetricsCollector,
}

impl Responder {
    pub fn new(pending: PendingRequest, metrics: MetricsCollector) -> Self {
        Self {
            id: pending.id,
            strategy: pending.strategy,
            received_at: pending.received_at,
            sink: Mutex::new(Some(pending.sink)),
            written: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.id
    }

    pub fn is_written(&self) -> bool {
        self.written.load(Ordering::SeqCst)
    }

    /// Escribe la respuesta para el resultado del trabajo.
    ///
    /// Retorna `false` si el request ya tenía respuesta.
    pub fn respond(&self, outcome: WorkOutcome) -> bool {
        let abandoned = matches!(outcome, Err(WorkError::Abandoned));
        let response = match outcome {
            Ok(body) => Response::text(StatusCode::Ok, &body),
            Err(err) => Response::error(StatusCode::InternalServerError, &err.to_string()),
        };

        let written = self.write_once(response);
        if written && abandoned {
            self.metrics.record_abandoned();
        }
        written
    }

    /// Responde sin ejecutar trabajo (request malformado)
    pub fn reject(&self, status: StatusCode, message: &str) -> bool {
        self.write_once(Response::error(status, message))
    }

    fn write_once(&self, response: Response) -> bool {
        if self
            .written
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.metrics.record_duplicate_write();
            warn!(request = self.id, strategy = %self.strategy, "second response write rejected");
            return false;
        }

        let Some(mut sink) = self.sink.lock().take() else {
            return false;
        };

        let request_id = self.id.to_string();
        let response = response
            .with_header("X-Request-Id", &request_id)
            .with_header("X-Strategy", self.strategy.identifier());
        let status = response.status();

        let result = sink.write_response(&response.to_bytes());
        let latency = self.received_at.elapsed();
        self.metrics.record_response(self.strategy, status, latency, result.is_ok());

        match result {
            Ok(()) => debug!(
                request = self.id,
                strategy = %self.strategy,
                status = status.as_u16(),
                ?latency,
                "response written"
            ),
            Err(err) => debug!(
                request = self.id,
                peer = %sink.peer(),
                %err,
                "client went away before the response was written"
            ),
        }
        true
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.is_written() {
            warn!(request = self.id, strategy = %self.strategy, "responder dropped without a response");
            self.respond(Err(WorkError::Abandoned));
        }
    }
}

/// Continuación de un request: la única vía para entregar su resultado
pub struct Completion {
    responder: Option<Arc<Responder>>,
    loop_handle: LoopHandle,
}

impl Completion {
    pub fn new(responder: Arc<Responder>, loop_handle: LoopHandle) -> Self {
        Self {
            responder: Some(responder),
            loop_handle,
        }
    }

    /// Loop dueño de la conexión
    pub fn loop_handle(&self) -> &LoopHandle {
        &self.loop_handle
    }

    pub fn request_id(&self) -> u64 {
        self.responder.as_ref().map(|r| r.request_id()).unwrap_or_default()
    }

    /// Entrega el resultado. La respuesta se escribe en el thread del loop:
    /// directamente si ya estamos ahí, si no con un post.
    pub fn complete(mut self, outcome: WorkOutcome) {
        if let Some(responder) = self.responder.take() {
            deliver(&self.loop_handle, responder, outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(responder) = self.responder.take() {
            warn!(request = responder.request_id(), "completion dropped without a result");
            deliver(&self.loop_handle, responder, Err(WorkError::Abandoned));
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("request", &self.request_id())
            .field("event_loop", &self.loop_handle.name())
            .finish()
    }
}

fn deliver(loop_handle: &LoopHandle, responder: Arc<Responder>, outcome: WorkOutcome) {
    if loop_handle.is_loop_thread() {
        responder.respond(outcome);
        return;
    }

    let write = Box::new(move || {
        responder.respond(outcome);
    });
    if let Err(write) = loop_handle.try_post(write) {
        // El loop ya terminó: no queda nadie más que pueda escribir
        debug!(event_loop = %loop_handle.name(), "loop stopped; writing response from the completing thread");
        write();
    }
}

/// Liga los requests de un listener con su estrategia
pub struct RequestDispatcher {
    strategy: Arc<dyn ExecutionStrategy>,
    work_delay: Duration,
    metrics: MetricsCollector,
}

impl RequestDispatcher {
    pub fn new(strategy: Arc<dyn ExecutionStrategy>, work_delay: Duration, metrics: MetricsCollector) -> Self {
        Self {
            strategy,
            work_delay,
            metrics,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Admite una conexión: desde acá el request cuenta como en vuelo y
    /// tiene garantizada una respuesta.
    pub fn admit(&self, sink: impl ResponseSink + 'static) -> PendingRequest {
        let kind = self.kind();
        self.metrics.record_received(kind);
        PendingRequest::new(kind, sink)
    }

    /// Ejecuta el request con la estrategia del listener. Corre en el loop.
    pub fn dispatch(&self, pending: PendingRequest, loop_handle: &LoopHandle) {
        let responder = Arc::new(Responder::new(pending, self.metrics.clone()));
        self.execute(responder, loop_handle);
    }

    /// Entrega el request al loop para que lo despache. Se llama desde el
    /// acceptor o desde cualquier otro thread.
    pub fn submit(self: &Arc<Self>, pending: PendingRequest, loop_handle: &LoopHandle) {
        // Con el Responder ya creado, un post rechazado igual termina en respuesta
        let responder = Arc::new(Responder::new(pending, self.metrics.clone()));
        let request = responder.request_id();
        let dispatcher = Arc::clone(self);
        let handle = loop_handle.clone();

        if !loop_handle.post(move || dispatcher.execute(responder, &handle)) {
            warn!(request, event_loop = %loop_handle.name(), "event loop stopped before dispatch");
        }
    }

    fn execute(&self, responder: Arc<Responder>, loop_handle: &LoopHandle) {
        let kind = self.kind();
        debug!(request = responder.request_id(), strategy = %kind, "dispatching request");

        let completion = Completion::new(responder, loop_handle.clone());
        let work = SimulatedWork::new(self.work_delay, kind.identifier());

        self.strategy.execute(work, completion);
    }

    /// Responde 400 a un request que no se pudo parsear
    pub fn reject(&self, pending: PendingRequest, reason: &str) {
        debug!(request = pending.id(), reason, "rejecting malformed request");
        let responder = Responder::new(pending, self.metrics.clone());
        responder.reject(StatusCode::BadRequest, reason);
    }
}
