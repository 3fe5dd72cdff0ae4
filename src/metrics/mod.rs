//! # Sistema de Métricas
//! src/metrics/mod.rs
//!
//! Recolección y agregación de métricas del servidor:
//! - Requests admitidos y respondidos, por estrategia
//! - Status codes escritos
//! - Latencias (p50, p95, p99) desde la admisión hasta la escritura
//! - Instrumentación del guard de escritura única (duplicados, abandonos)

pub mod collector;

pub use collector::{LatencySummary, MetricsCollector, MetricsSnapshot, StrategyCounters};
