//! # InlineBlocking
//! src/strategy/inline.rs
//!
//! Ejecuta la espera en el thread del loop. Es el anti-patrón que sirve de
//! línea base: mientras dura la espera el loop no atiende nada más, así que
//! los requests de este listener quedan serializados.

use super::{ExecutionStrategy, SimulatedWork, StrategyKind};
use crate::dispatcher::Completion;
use tracing::trace;

#[derive(Debug, Default, Clone, Copy)]
pub struct InlineBlocking;

impl InlineBlocking {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionStrategy for InlineBlocking {
    fn kind(&self) -> StrategyKind {
        StrategyKind::InlineBlocking
    }

    fn execute(&self, work: SimulatedWork, completion: Completion) {
        trace!(request = completion.request_id(), delay = ?work.delay, "blocking the event loop");
        let outcome = work.perform_blocking();
        completion.complete(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::testing::{body_of, wait_until, RecordingSink};
    use crate::dispatcher::{PendingRequest, Responder};
    use crate::event_loop::EventLoop;
    use crate::metrics::MetricsCollector;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_inline_stalls_the_loop() {
        let running = EventLoop::spawn("inline").unwrap();
        let handle = running.handle();
        let sink = RecordingSink::default();
        let metrics = MetricsCollector::new();

        let completion = Completion::new(
            Arc::new(Responder::new(
                PendingRequest::new(StrategyKind::InlineBlocking, sink.clone()),
                metrics,
            )),
            handle.clone(),
        );
        handle.post(move || {
            InlineBlocking::new().execute(SimulatedWork::new(Duration::from_millis(200), "InlineBlocking"), completion)
        });

        // Un callback posteado después tiene que esperar a que termine la espera
        let start = Instant::now();
        let ran_at = Arc::new(Mutex::new(None));
        {
            let ran_at = Arc::clone(&ran_at);
            handle.post(move || *ran_at.lock() = Some(start.elapsed()));
        }

        assert!(wait_until(Duration::from_secs(2), || ran_at.lock().is_some()));
        let waited = ran_at.lock().unwrap_or_default();
        assert!(waited >= Duration::from_millis(150), "loop was free after {:?}", waited);

        assert_eq!(sink.write_count(), 1);
        assert_eq!(body_of(&sink.writes()[0]), "InlineBlocking");
    }
}
