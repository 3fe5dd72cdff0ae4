//! # Errores del Servidor
//! src/error.rs
//!
//! Taxonomía de errores:
//!
//! - [`WorkError`]: la unidad de trabajo falló (espera interrumpida, panic,
//!   continuación perdida). Nunca tumba el proceso: se convierte en resultado
//!   y la respuesta se escribe igual, con status 500.
//! - [`ServerError`]: fallos de arranque (bind, configuración inválida,
//!   listener sin estrategia). Son fatales en `Server::start`, nunca por request.

use crate::strategy::StrategyKind;
use thiserror::Error;

/// Resultado de una unidad de trabajo: el string de respuesta o el fallo
pub type WorkOutcome = Result<String, WorkError>;

/// Fallo transitorio de una unidad de trabajo
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    /// La espera fue interrumpida antes de completarse
    #[error("work interrupted while suspended")]
    Interrupted,

    /// El trabajo hizo panic en un worker o en un fiber
    #[error("work panicked: {0}")]
    Panicked(String),

    /// La continuación se descartó sin entregar un resultado
    #[error("completion dropped before the work finished")]
    Abandoned,

    /// No se pudieron reservar recursos para ejecutar el trabajo
    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

impl WorkError {
    /// Construye `Panicked` a partir del payload de `catch_unwind`
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        WorkError::Panicked(message)
    }
}

/// Errores de arranque y ciclo de vida del servidor
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no strategy can be bound to port {port}: {strategy} is disabled")]
    NoStrategy { port: u16, strategy: StrategyKind },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
