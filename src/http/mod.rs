//! # Módulo HTTP
//! src/http/mod.rs
//!
//! Implementación mínima del protocolo, sin librerías de alto nivel:
//!
//! - Parsing de requests HTTP/1.0 y HTTP/1.1 con cualquier método
//! - Construcción de responses HTTP/1.0 con `Content-Length` exacto
//! - Códigos de estado usados por el harness
//!
//! ### Formato de Response
//!
//! ```text
//! HTTP/1.0 200 OK\r\n
//! Content-Type: text/plain; charset=utf-8\r\n
//! Content-Length: 10\r\n
//! X-Strategy: TimerAsync\r\n
//! Connection: close\r\n
//! \r\n
//! TimerAsync
//! ```

pub mod request;
pub mod response;
pub mod status;

pub use request::{Method, ParseError, Request};
pub use response::Response;
pub use status::StatusCode;
