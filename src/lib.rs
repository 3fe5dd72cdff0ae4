//! # Event Loop Server
//! src/lib.rs
//!
//! Harness HTTP que compara cuatro formas de ejecutar una operación
//! bloqueante dentro de un servidor basado en event loop, sin romper (o
//! rompiendo a propósito) el contrato de no bloquear el loop.
//!
//! ## Arquitectura
//!
//! - `event_loop`: run-loop de un solo thread con timers integrados
//! - `workers`: pool fijo de threads para trabajo bloqueante
//! - `fiber`: fibers stackful multiplexados sobre carriers
//! - `strategy`: `InlineBlocking`, `PoolOffload`, `FiberSuspend`, `TimerAsync`
//! - `dispatcher`: liga cada request con su estrategia y escribe una sola respuesta
//! - `http`: parsing de requests y construcción de responses
//! - `server`: listeners por puerto, arranque y apagado
//! - `metrics`: contadores, latencias y verificación de escritura única
//! - `config`: puertos por CLI/env y parámetros fijos
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use event_loop_server::config::Config;
//! use event_loop_server::server::Server;
//!
//! let server = Server::start(Config::default()).expect("Error al iniciar servidor");
//! // ... atender requests ...
//! let metrics = server.stop();
//! println!("{} requests respondidos", metrics.responded);
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_loop;
pub mod fiber;
pub mod http;
pub mod metrics;
pub mod server;
pub mod strategy;
pub mod workers;
