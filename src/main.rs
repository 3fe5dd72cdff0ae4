//! # Event Loop Server - Entry Point
//! src/main.rs
//!
//! Arranca los cuatro listeners y corre hasta que se presiona Enter.

use event_loop_server::config::Config;
use event_loop_server::server::Server;
use std::io::BufRead;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    println!("=================================");
    println!("  Event Loop Server");
    println!("  Estrategias para trabajo bloqueante");
    println!("=================================\n");

    let config = Config::load();
    config.print_summary();

    let server = match Server::start(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("💥 Error fatal: {}", e);
            std::process::exit(1);
        }
    };

    for (strategy, addr) in server.listeners() {
        println!("✅ {:<15} http://{}", strategy.identifier(), addr);
    }
    println!("\nPresioná Enter para detener el servidor...");

    wait_for_enter();

    let metrics = server.stop();
    println!("\n👋 Servidor detenido: {} requests respondidos", metrics.responded);
}

/// Filtro de logs: `RUST_LOG` si es válido, `info` en otro caso
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Bloquea hasta leer una línea de stdin. Sin stdin (EOF) espera para siempre.
fn wait_for_enter() {
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => loop {
            std::thread::park();
        },
        Ok(_) => {}
    }
}
