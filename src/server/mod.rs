//! # Módulo del Servidor
//! src/server/mod.rs
//!
//! Arma el proceso completo a partir de la `Config`:
//! 1. Crea los recursos compartidos (pool de workers, scheduler de fibers)
//! 2. Construye una estrategia por listener
//! 3. Bindea cada puerto con su propio event loop y acceptor
//!
//! ## Apagado
//!
//! `stop()` deja de aceptar conexiones, espera (con un límite) a que los
//! requests en vuelo se respondan, y recién entonces desarma todo en este
//! orden: scheduler (interrumpe fibers dormidos), pool (termina lo
//! encolado), loops (corren lo que quedó en sus colas).

pub mod listener;

pub use listener::Listener;

use crate::config::Config;
use crate::error::ServerError;
use crate::fiber::FiberScheduler;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::strategy::{ExecutionStrategy, FiberSuspend, InlineBlocking, PoolOffload, StrategyKind, TimerAsync};
use crate::workers::WorkerPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Servidor con un listener por estrategia
pub struct Server {
    config: Config,
    listeners: Vec<Listener>,
    pool: Arc<WorkerPool>,
    scheduler: Arc<FiberScheduler>,
    metrics: MetricsCollector,
    stopped: bool,
}

impl Server {
    /// Valida la configuración, bindea todos los listeners y empieza a aceptar
    pub fn start(config: Config) -> Result<Self, ServerError> {
        config.validate()?;

        let metrics = MetricsCollector::new();
        let pool = Arc::new(WorkerPool::new(config.workers, config.backlog_warn)?);
        let scheduler = Arc::new(FiberScheduler::new(config.carriers)?);

        let mut listeners = Vec::new();
        for spec in config.listeners() {
            let strategy = build_strategy(spec.strategy, &pool, &scheduler);
            // Si un bind falla, los listeners ya creados se desarman en su Drop
            listeners.push(Listener::bind(spec, &config, strategy, metrics.clone())?);
        }

        info!(
            listeners = listeners.len(),
            workers = config.workers,
            carriers = config.carriers,
            work_delay_ms = config.work_delay_ms,
            "server started"
        );

        Ok(Self {
            config,
            listeners,
            pool,
            scheduler,
            metrics,
            stopped: false,
        })
    }

    /// Dirección real del listener de `kind` (útil con puerto 0)
    pub fn local_addr(&self, kind: StrategyKind) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.strategy() == kind)
            .map(|l| l.local_addr())
    }

    pub fn listeners(&self) -> impl Iterator<Item = (StrategyKind, SocketAddr)> + '_ {
        self.listeners.iter().map(|l| (l.strategy(), l.local_addr()))
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Apaga el servidor y retorna las métricas finales
    pub fn stop(mut self) -> MetricsSnapshot {
        self.shutdown();
        self.metrics.snapshot()
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("stopping server");

        for listener in &mut self.listeners {
            listener.stop_accepting();
        }

        let grace = self.config.shutdown_grace();
        if !self.wait_for_in_flight(grace) {
            warn!(
                in_flight = self.metrics.in_flight(),
                ?grace,
                "grace period elapsed with requests still in flight"
            );
        }

        self.scheduler.shutdown();
        self.pool.shutdown();
        for listener in &mut self.listeners {
            listener.shutdown_loop();
        }

        info!(metrics = %self.metrics.to_json(), "server stopped");
    }

    fn wait_for_in_flight(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if self.metrics.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_strategy(kind: StrategyKind, pool: &Arc<WorkerPool>, scheduler: &Arc<FiberScheduler>) -> Arc<dyn ExecutionStrategy> {
    match kind {
        StrategyKind::InlineBlocking => Arc::new(InlineBlocking::new()),
        StrategyKind::PoolOffload => Arc::new(PoolOffload::new(Arc::clone(pool))),
        StrategyKind::FiberSuspend => Arc::new(FiberSuspend::new(Arc::clone(scheduler))),
        StrategyKind::TimerAsync => Arc::new(TimerAsync::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_binds_every_strategy() {
        let server = Server::start(Config::ephemeral()).unwrap();

        for kind in StrategyKind::ALL {
            let addr = server.local_addr(kind).unwrap();
            assert_ne!(addr.port(), 0);
        }
        assert_eq!(server.listeners().count(), 4);

        let snapshot = server.stop();
        assert_eq!(snapshot.received, 0);
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let config = Config {
            workers: 0,
            ..Config::ephemeral()
        };
        assert!(matches!(
            Server::start(config),
            Err(ServerError::NoStrategy { strategy: StrategyKind::PoolOffload, .. })
        ));
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            pool_port: taken.local_addr().unwrap().port(),
            ..Config::ephemeral()
        };

        assert!(matches!(Server::start(config), Err(ServerError::Bind { .. })));
    }
}
