//! # Collector de Métricas
//! src/metrics/collector.rs
//!
//! Recolecta y agrega métricas del servidor en tiempo real. El guard de
//! escritura única reporta aquí cada intento, así que los contadores sirven
//! para verificar que cada request recibió exactamente una respuesta:
//! `received == responded` una vez que `in_flight` llega a cero, y
//! `duplicate_writes` se mantiene en cero.

use crate::http::StatusCode;
use crate::strategy::StrategyKind;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Máximo de latencias guardadas para calcular percentiles
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Collector de métricas thread-safe
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsData>>,
    start_time: Instant,
}

#[derive(Default)]
struct MetricsData {
    received: u64,
    responded: u64,
    /// Respuestas que el guard aceptó pero el socket rechazó (cliente desconectado)
    write_errors: u64,
    duplicate_writes: u64,
    abandoned: u64,
    status_codes: BTreeMap<u16, u64>,
    strategies: BTreeMap<&'static str, StrategyCounters>,
    /// Latencias en microsegundos, de la más vieja a la más nueva
    latencies: VecDeque<u64>,
}

/// Contadores de una estrategia
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrategyCounters {
    pub received: u64,
    pub responded: u64,
    /// Respuestas con status distinto de 2xx
    pub failed: u64,
}

/// Resumen de latencias en microsegundos
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub avg: u64,
    pub max: u64,
    pub samples: usize,
}

/// Snapshot de métricas (para logs, tests y el resumen de apagado)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub received: u64,
    pub responded: u64,
    pub in_flight: u64,
    pub write_errors: u64,
    pub duplicate_writes: u64,
    pub abandoned: u64,
    pub status_codes: BTreeMap<u16, u64>,
    pub strategies: BTreeMap<String, StrategyCounters>,
    pub latency_us: LatencySummary,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsData::default())),
            start_time: Instant::now(),
        }
    }

    /// Un request fue admitido y espera su respuesta
    pub fn record_received(&self, strategy: StrategyKind) {
        let mut data = self.inner.lock();
        data.received += 1;
        data.strategies.entry(strategy.identifier()).or_default().received += 1;
    }

    /// El guard escribió la respuesta (única) de un request.
    ///
    /// `delivered` es falso si el socket falló; el request cuenta igual como
    /// respondido porque su acción terminal ya ocurrió.
    pub fn record_response(&self, strategy: StrategyKind, status: StatusCode, latency: Duration, delivered: bool) {
        let mut data = self.inner.lock();
        data.responded += 1;
        if !delivered {
            data.write_errors += 1;
        }
        *data.status_codes.entry(status.as_u16()).or_insert(0) += 1;

        let counters = data.strategies.entry(strategy.identifier()).or_default();
        counters.responded += 1;
        if !status.is_success() {
            counters.failed += 1;
        }

        if data.latencies.len() >= MAX_LATENCY_SAMPLES {
            data.latencies.pop_front();
        }
        data.latencies.push_back(latency.as_micros() as u64);
    }

    /// El guard rechazó un segundo intento de escritura
    pub fn record_duplicate_write(&self) {
        self.inner.lock().duplicate_writes += 1;
    }

    /// Un request se respondió con `Abandoned` porque se perdió su continuación
    pub fn record_abandoned(&self) {
        self.inner.lock().abandoned += 1;
    }

    /// Requests admitidos que todavía no tienen respuesta
    pub fn in_flight(&self) -> u64 {
        let data = self.inner.lock();
        data.received.saturating_sub(data.responded)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let data = self.inner.lock();

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            received: data.received,
            responded: data.responded,
            in_flight: data.received.saturating_sub(data.responded),
            write_errors: data.write_errors,
            duplicate_writes: data.duplicate_writes,
            abandoned: data.abandoned,
            status_codes: data.status_codes.clone(),
            strategies: data
                .strategies
                .iter()
                .map(|(name, counters)| (name.to_string(), *counters))
                .collect(),
            latency_us: summarize(&data.latencies),
        }
    }

    /// Snapshot serializado como JSON legible
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.snapshot()).unwrap_or_else(|err| format!(r#"{{"error": "{}"}}"#, err))
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(latencies: &VecDeque<u64>) -> LatencySummary {
    if latencies.is_empty() {
        return LatencySummary::default();
    }

    let mut sorted: Vec<u64> = latencies.iter().copied().collect();
    sorted.sort_unstable();

    let len = sorted.len();
    let sum: u64 = sorted.iter().sum();

    LatencySummary {
        p50: sorted[len * 50 / 100],
        p95: sorted[len * 95 / 100],
        p99: sorted[len * 99 / 100],
        avg: sum / len as u64,
        max: sorted[len - 1],
        samples: len,
    }
}
