//! # FiberSuspend
//! src/strategy/fiber.rs
//!
//! Corre el trabajo dentro de un fiber. La espera suspende al fiber (no al
//! carrier), y al reanudarse el cuerpo sigue justo después de la llamada,
//! con sus variables locales intactas. La escritura vuelve al loop a través
//! de la `Completion`, igual que en `PoolOffload`.

use super::{ExecutionStrategy, SimulatedWork, StrategyKind};
use crate::dispatcher::Completion;
use crate::error::WorkError;
use crate::fiber::{FiberContext, FiberScheduler};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub struct FiberSuspend {
    scheduler: Arc<FiberScheduler>,
}

impl FiberSuspend {
    pub fn new(scheduler: Arc<FiberScheduler>) -> Self {
        Self { scheduler }
    }
}

impl ExecutionStrategy for FiberSuspend {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FiberSuspend
    }

    fn execute(&self, work: SimulatedWork, completion: Completion) {
        let request = completion.request_id();
        let handle = self.scheduler.run_in_fiber(
            move |ctx| {
                pause(ctx, work.delay)?;
                Ok(work.output)
            },
            move |outcome| completion.complete(outcome),
        );
        trace!(request, fiber = %handle.id(), "request running in fiber");
    }
}

/// Espera suspendiendo al fiber. Al estar en una función aparte muestra que
/// la suspensión funciona a cualquier profundidad del stack del fiber.
fn pause(ctx: &FiberContext<'_>, delay: Duration) -> Result<(), WorkError> {
    ctx.sleep(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::testing::{body_of, wait_until, RecordingSink};
    use crate::dispatcher::{PendingRequest, Responder};
    use crate::event_loop::EventLoop;
    use crate::metrics::MetricsCollector;
    use std::time::Instant;

    #[test]
    fn test_many_fibers_on_one_carrier() {
        let running = EventLoop::spawn("fiber").unwrap();
        let handle = running.handle();
        // Un solo carrier: 8 esperas concurrentes solo caben si los fibers no lo ocupan
        let strategy = Arc::new(FiberSuspend::new(Arc::new(FiberScheduler::new(1).unwrap())));
        let metrics = MetricsCollector::new();
        let sinks: Vec<RecordingSink> = (0..8).map(|_| RecordingSink::default()).collect();
        let start = Instant::now();

        for sink in &sinks {
            let completion = Completion::new(
                Arc::new(Responder::new(
                    PendingRequest::new(StrategyKind::FiberSuspend, sink.clone()),
                    metrics.clone(),
                )),
                handle.clone(),
            );
            let strategy = Arc::clone(&strategy);
            handle.post(move || strategy.execute(SimulatedWork::new(Duration::from_millis(200), "FiberSuspend"), completion));
        }

        assert!(wait_until(Duration::from_secs(2), || sinks.iter().all(|s| s.write_count() == 1)));
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);

        for sink in &sinks {
            assert_eq!(body_of(&sink.writes()[0]), "FiberSuspend");
        }
    }
}
