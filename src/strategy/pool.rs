//! # PoolOffload
//! src/strategy/pool.rs
//!
//! Manda la espera a un thread del `WorkerPool`. El loop retorna de
//! inmediato; cuando el worker termina, la continuación postea la escritura
//! de vuelta al loop.

use super::{ExecutionStrategy, SimulatedWork, StrategyKind};
use crate::dispatcher::Completion;
use crate::workers::{WorkItem, WorkerPool};
use std::sync::Arc;

pub struct PoolOffload {
    pool: Arc<WorkerPool>,
}

impl PoolOffload {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }
}

impl ExecutionStrategy for PoolOffload {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PoolOffload
    }

    fn execute(&self, work: SimulatedWork, completion: Completion) {
        self.pool.submit(WorkItem::new(
            move || work.perform_blocking(),
            move |outcome| completion.complete(outcome),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::testing::{body_of, wait_until, RecordingSink};
    use crate::dispatcher::{PendingRequest, Responder};
    use crate::event_loop::EventLoop;
    use crate::metrics::MetricsCollector;
    use std::time::{Duration, Instant};

    #[test]
    fn test_pool_offload_keeps_loop_free() {
        let running = EventLoop::spawn("pool").unwrap();
        let handle = running.handle();
        let strategy = Arc::new(PoolOffload::new(Arc::new(WorkerPool::new(4, 16).unwrap())));
        let metrics = MetricsCollector::new();
        let sinks: Vec<RecordingSink> = (0..4).map(|_| RecordingSink::default()).collect();
        let start = Instant::now();

        for sink in &sinks {
            let completion = Completion::new(
                Arc::new(Responder::new(
                    PendingRequest::new(StrategyKind::PoolOffload, sink.clone()),
                    metrics.clone(),
                )),
                handle.clone(),
            );
            let strategy = Arc::clone(&strategy);
            handle.post(move || strategy.execute(SimulatedWork::new(Duration::from_millis(200), "PoolOffload"), completion));
        }

        assert!(wait_until(Duration::from_secs(2), || sinks.iter().all(|s| s.write_count() == 1)));
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);

        for sink in &sinks {
            assert_eq!(body_of(&sink.writes()[0]), "PoolOffload");
        }
        assert_eq!(running.handle().stats().faults, 0);
    }
}
