//! # Configuración del Servidor
//! src/config.rs
//!
//! En la línea de comandos solo se pueden cambiar los puertos. El resto de
//! los parámetros (host, workers, carriers, duración del trabajo simulado)
//! son valores fijos que el código y los tests pueden ajustar.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./event_loop_server --timer-port 9000 --pool-port 9002
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! INLINE_PORT=9001 FIBER_PORT=9003 ./event_loop_server
//! ```

use crate::error::ServerError;
use crate::strategy::StrategyKind;
use clap::Parser;
use std::collections::HashMap;
use std::time::Duration;

/// Un listener: puerto + la estrategia con la que atiende
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSpec {
    /// `0` pide un puerto efímero al SO
    pub port: u16,
    pub strategy: StrategyKind,
}

/// Configuración del servidor
#[derive(Debug, Clone, Parser)]
#[command(name = "event_loop_server")]
#[command(about = "Harness HTTP que compara estrategias para trabajo bloqueante dentro de un event loop")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Puerto del listener TimerAsync
    #[arg(long = "timer-port", default_value = "8000", env = "TIMER_PORT")]
    pub timer_port: u16,

    /// Puerto del listener InlineBlocking
    #[arg(long = "inline-port", default_value = "8001", env = "INLINE_PORT")]
    pub inline_port: u16,

    /// Puerto del listener PoolOffload
    #[arg(long = "pool-port", default_value = "8002", env = "POOL_PORT")]
    pub pool_port: u16,

    /// Puerto del listener FiberSuspend
    #[arg(long = "fiber-port", default_value = "8003", env = "FIBER_PORT")]
    pub fiber_port: u16,

    #[arg(skip = String::from("127.0.0.1"))]
    pub host: String,

    /// Threads del pool bloqueante (compartido por todos los listeners)
    #[arg(skip = 20usize)]
    pub workers: usize,

    /// Carriers del scheduler de fibers
    #[arg(skip = 2usize)]
    pub carriers: usize,

    /// Duración de la operación bloqueante simulada
    #[arg(skip = 1000u64)]
    pub work_delay_ms: u64,

    /// Tamaño de backlog del pool a partir del cual se emite un warning
    #[arg(skip = 64usize)]
    pub backlog_warn: usize,

    /// Cuánto espera `stop()` a los requests en vuelo
    #[arg(skip = 5000u64)]
    pub shutdown_grace_ms: u64,

    /// Timeout de lectura del request
    #[arg(skip = 5000u64)]
    pub read_timeout_ms: u64,

    /// Timeout de escritura de la respuesta. La escritura corre en el loop.
    #[arg(skip = 2000u64)]
    pub write_timeout_ms: u64,
}

impl Config {
    /// Parsea argumentos CLI y variables de entorno
    pub fn load() -> Self {
        Config::parse()
    }

    /// Configuración con puertos efímeros en todos los listeners
    ///
    /// ```
    /// use event_loop_server::config::Config;
    ///
    /// let config = Config::ephemeral();
    /// assert!(config.listeners().iter().all(|l| l.port == 0));
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn ephemeral() -> Self {
        Self {
            timer_port: 0,
            inline_port: 0,
            pool_port: 0,
            fiber_port: 0,
            ..Self::default()
        }
    }

    pub fn port_for(&self, strategy: StrategyKind) -> u16 {
        match strategy {
            StrategyKind::TimerAsync => self.timer_port,
            StrategyKind::InlineBlocking => self.inline_port,
            StrategyKind::PoolOffload => self.pool_port,
            StrategyKind::FiberSuspend => self.fiber_port,
        }
    }

    /// Lista explícita de listeners que arranca `Server::start`
    pub fn listeners(&self) -> Vec<ListenerSpec> {
        StrategyKind::ALL
            .iter()
            .map(|&strategy| ListenerSpec {
                port: self.port_for(strategy),
                strategy,
            })
            .collect()
    }

    pub fn address(&self, port: u16) -> String {
        format!("{}:{}", self.host, port)
    }

    pub fn work_delay(&self) -> Duration {
        Duration::from_millis(self.work_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Valida la configuración antes de bindear nada
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.host.trim().is_empty() {
            return Err(ServerError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(ServerError::InvalidConfig("read timeout must be > 0".to_string()));
        }
        if self.write_timeout_ms == 0 {
            return Err(ServerError::InvalidConfig("write timeout must be > 0".to_string()));
        }

        // Un listener sin su recurso no tiene con qué ejecutar
        if self.workers == 0 {
            return Err(ServerError::NoStrategy {
                port: self.pool_port,
                strategy: StrategyKind::PoolOffload,
            });
        }
        if self.carriers == 0 {
            return Err(ServerError::NoStrategy {
                port: self.fiber_port,
                strategy: StrategyKind::FiberSuspend,
            });
        }

        let mut seen: HashMap<u16, StrategyKind> = HashMap::new();
        for listener in self.listeners().into_iter().filter(|l| l.port != 0) {
            if let Some(previous) = seen.insert(listener.port, listener.strategy) {
                return Err(ServerError::InvalidConfig(format!(
                    "port {} assigned to both {} and {}",
                    listener.port, previous, listener.strategy
                )));
            }
        }

        Ok(())
    }

    /// Imprime un resumen de la configuración
    pub fn print_summary(&self) {
        println!("⚙️  Configuración:");
        println!("   Host:          {}", self.host);
        for listener in self.listeners() {
            println!("   {:<15} puerto {}", listener.strategy.identifier(), listener.port);
        }
        println!("   Workers:       {}", self.workers);
        println!("   Carriers:      {}", self.carriers);
        println!("   Trabajo:       {} ms", self.work_delay_ms);
        println!();
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timer_port: StrategyKind::TimerAsync.default_port(),
            inline_port: StrategyKind::InlineBlocking.default_port(),
            pool_port: StrategyKind::PoolOffload.default_port(),
            fiber_port: StrategyKind::FiberSuspend.default_port(),
            host: "127.0.0.1".to_string(),
            workers: 20,
            carriers: 2,
            work_delay_ms: 1000,
            backlog_warn: 64,
            shutdown_grace_ms: 5000,
            read_timeout_ms: 5000,
            write_timeout_ms: 2000,
        }
    }
}
