//! # TimerAsync
//! src/strategy/timer.rs
//!
//! Arma un timer en el loop dueño de la conexión. Nadie espera: el callback
//! corre en el loop cuando vence y escribe la respuesta directamente.

use super::{ExecutionStrategy, SimulatedWork, StrategyKind};
use crate::dispatcher::Completion;
use tracing::trace;

#[derive(Debug, Default, Clone, Copy)]
pub struct TimerAsync;

impl TimerAsync {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionStrategy for TimerAsync {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TimerAsync
    }

    fn execute(&self, work: SimulatedWork, completion: Completion) {
        let loop_handle = completion.loop_handle().clone();
        let request = completion.request_id();
        let SimulatedWork { delay, output } = work;

        let timer = loop_handle.set_timer(delay, move || completion.complete(Ok(output)));
        trace!(request, %timer, ?delay, "response scheduled on timer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::testing::{body_of, wait_until, RecordingSink};
    use crate::dispatcher::{PendingRequest, Responder};
    use crate::event_loop::EventLoop;
    use crate::metrics::MetricsCollector;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn completion(sink: &RecordingSink, metrics: &MetricsCollector, handle: &crate::event_loop::LoopHandle) -> Completion {
        Completion::new(
            Arc::new(Responder::new(
                PendingRequest::new(StrategyKind::TimerAsync, sink.clone()),
                metrics.clone(),
            )),
            handle.clone(),
        )
    }

    #[test]
    fn test_timers_complete_concurrently() {
        let running = EventLoop::spawn("timer").unwrap();
        let handle = running.handle();
        let metrics = MetricsCollector::new();
        let sinks: Vec<RecordingSink> = (0..5).map(|_| RecordingSink::default()).collect();
        let start = Instant::now();

        for sink in &sinks {
            let completion = completion(sink, &metrics, &handle);
            handle.post(move || TimerAsync::new().execute(SimulatedWork::new(Duration::from_millis(200), "TimerAsync"), completion));
        }

        assert!(wait_until(Duration::from_secs(2), || sinks.iter().all(|s| s.write_count() == 1)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);

        for sink in &sinks {
            assert_eq!(body_of(&sink.writes()[0]), "TimerAsync");
        }
        assert_eq!(running.handle().stats().timers_fired, 5);
    }

    #[test]
    fn test_pending_timer_at_shutdown_still_answers() {
        let running = EventLoop::spawn("timer-shutdown").unwrap();
        let handle = running.handle();
        let metrics = MetricsCollector::new();
        let sink = RecordingSink::default();

        let completion = completion(&sink, &metrics, &handle);
        handle.post(move || TimerAsync::new().execute(SimulatedWork::new(Duration::from_secs(60), "TimerAsync"), completion));
        running.shutdown();

        assert_eq!(sink.write_count(), 1);
        assert!(sink.writes()[0].starts_with("HTTP/1.0 500"));
        assert_eq!(metrics.snapshot().abandoned, 1);
    }
}
