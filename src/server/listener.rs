//! # Listener por Puerto
//! src/server/listener.rs
//!
//! Cada listener tiene:
//! 1. Un `TcpListener` bindeado a su puerto
//! 2. Un event loop propio (`loop-{estrategia}`)
//! 3. Un thread acceptor (`accept-{estrategia}`) que acepta conexiones y
//!    lanza un thread lector (`read-{estrategia}`) por conexión
//! 4. El lector lee el request y se lo entrega al loop a través del dispatcher
//!
//! Los lectores son la plomería de I/O: el loop solo ve requests ya leídos, y
//! un cliente lento solo ocupa su propio lector.

use crate::config::{Config, ListenerSpec};
use crate::dispatcher::RequestDispatcher;
use crate::error::ServerError;
use crate::event_loop::{EventLoop, LoopHandle, RunningLoop};
use crate::http::Request;
use crate::metrics::MetricsCollector;
use crate::strategy::{ExecutionStrategy, StrategyKind};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tamaño máximo del request que se lee
const READ_BUFFER_SIZE: usize = 8192;

pub struct Listener {
    spec: ListenerSpec,
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    event_loop: Option<RunningLoop>,
}

impl Listener {
    /// Bindea el puerto y arranca el loop y el acceptor
    pub fn bind(
        spec: ListenerSpec,
        config: &Config,
        strategy: Arc<dyn ExecutionStrategy>,
        metrics: MetricsCollector,
    ) -> Result<Self, ServerError> {
        if strategy.kind() != spec.strategy {
            return Err(ServerError::NoStrategy {
                port: spec.port,
                strategy: spec.strategy,
            });
        }

        let address = config.address(spec.port);
        let tcp = TcpListener::bind(&address).map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;
        let local_addr = tcp.local_addr()?;

        let name = spec.strategy.identifier();
        let event_loop = EventLoop::spawn(name)?;
        let dispatcher = Arc::new(RequestDispatcher::new(strategy, config.work_delay(), metrics));
        let stopping = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let loop_handle = event_loop.handle();
            let stopping = Arc::clone(&stopping);
            let timeouts = Timeouts {
                read: config.read_timeout(),
                write: config.write_timeout(),
            };
            let thread_name = format!("accept-{}", name);

            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || accept_loop(tcp, dispatcher, loop_handle, stopping, timeouts))
                .map_err(|source| ServerError::Spawn { name: thread_name, source })?
        };

        info!(strategy = %spec.strategy, %local_addr, "listener ready");

        Ok(Self {
            spec,
            local_addr,
            stopping,
            acceptor: Some(acceptor),
            event_loop: Some(event_loop),
        })
    }

    pub fn strategy(&self) -> StrategyKind {
        self.spec.strategy
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Deja de aceptar conexiones y espera al acceptor y a sus lectores
    pub fn stop_accepting(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };

        self.stopping.store(true, Ordering::SeqCst);
        // `accept` bloquea: una conexión propia lo despierta para que vea la bandera
        if let Err(err) = TcpStream::connect_timeout(&self.wake_addr(), Duration::from_secs(1)) {
            warn!(strategy = %self.spec.strategy, %err, "could not wake acceptor");
        }
        if acceptor.join().is_err() {
            error!(strategy = %self.spec.strategy, "acceptor thread panicked");
        }
        debug!(strategy = %self.spec.strategy, "acceptor stopped");
    }

    /// Detiene el loop. Los callbacks ya encolados corren antes.
    pub fn shutdown_loop(&mut self) {
        if let Some(event_loop) = self.event_loop.take() {
            event_loop.shutdown();
        }
    }

    fn wake_addr(&self) -> SocketAddr {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr {
                SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        addr
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop_accepting();
        self.shutdown_loop();
    }
}

#[derive(Clone, Copy)]
struct Timeouts {
    read: Duration,
    write: Duration,
}

fn accept_loop(
    tcp: TcpListener,
    dispatcher: Arc<RequestDispatcher>,
    loop_handle: LoopHandle,
    stopping: Arc<AtomicBool>,
    timeouts: Timeouts,
) {
    let reader_name = format!("read-{}", dispatcher.kind().identifier());
    let mut readers: Vec<JoinHandle<()>> = Vec::new();

    for stream in tcp.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }

        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(strategy = %dispatcher.kind(), %err, "accept failed");
                continue;
            }
        };

        readers.retain(|reader| !reader.is_finished());

        let dispatcher_for_reader = Arc::clone(&dispatcher);
        let loop_handle = loop_handle.clone();
        let spawned = thread::Builder::new()
            .name(reader_name.clone())
            .spawn(move || handle_connection(stream, &dispatcher_for_reader, &loop_handle, timeouts));

        match spawned {
            Ok(reader) => readers.push(reader),
            Err(err) => error!(strategy = %dispatcher.kind(), %err, "failed to spawn reader thread"),
        }
    }

    // Cada lector termina a lo sumo tras su timeout de lectura
    for reader in readers {
        if reader.join().is_err() {
            error!(strategy = %dispatcher.kind(), "reader thread panicked");
        }
    }
}

/// Lee un request y lo entrega al dispatcher (o lo rechaza con 400)
fn handle_connection(
    mut stream: TcpStream,
    dispatcher: &Arc<RequestDispatcher>,
    loop_handle: &LoopHandle,
    timeouts: Timeouts,
) {
    let read = prepare_connection(&mut stream, timeouts);
    let pending = dispatcher.admit(stream);

    match read {
        Ok(request) => {
            debug!(
                request = pending.id(),
                method = %request.method(),
                path = request.path(),
                "request received"
            );
            dispatcher.submit(pending, loop_handle);
        }
        Err(reason) => dispatcher.reject(pending, &reason),
    }
}

/// Lee el request y acota la escritura posterior, que corre en el loop
fn prepare_connection(stream: &mut TcpStream, timeouts: Timeouts) -> Result<Request, String> {
    let read = read_request(stream, timeouts.read);
    if let Err(err) = stream.set_write_timeout(Some(timeouts.write)) {
        warn!(%err, "could not set write timeout");
    }
    read
}

/// Lee hasta el fin de los headers (o hasta llenar el buffer) y parsea
fn read_request(stream: &mut TcpStream, timeout: Duration) -> Result<Request, String> {
    stream.set_read_timeout(Some(timeout)).map_err(|e| e.to_string())?;

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut filled = 0;

    while filled < buffer.len() && !Request::head_complete(&buffer[..filled]) {
        match stream.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(format!("failed to read request: {}", err)),
        }
    }

    Request::parse(&buffer[..filled]).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_read_request_across_partial_writes() {
        let (mut client, mut server) = pair();

        let writer = thread::spawn(move || {
            client.write_all(b"GET /split HTTP/1.0\r\n").unwrap();
            thread::sleep(Duration::from_millis(30));
            client.write_all(b"Host: x\r\n\r\n").unwrap();
            client
        });

        let request = read_request(&mut server, Duration::from_secs(2)).unwrap();
        assert_eq!(request.path(), "/split");
        assert_eq!(request.header("host"), Some("x"));
        writer.join().unwrap();
    }

    #[test]
    fn test_read_request_rejects_garbage() {
        let (mut client, mut server) = pair();
        client.write_all(b"not http at all\r\n\r\n").unwrap();

        assert!(read_request(&mut server, Duration::from_secs(2)).is_err());
    }

    #[test]
    fn test_prepared_connection_has_write_timeout() {
        let (mut client, mut server) = pair();
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();

        let timeouts = Timeouts {
            read: Duration::from_secs(2),
            write: Duration::from_millis(750),
        };
        let request = prepare_connection(&mut server, timeouts).unwrap();

        assert_eq!(request.path(), "/");
        assert_eq!(server.write_timeout().unwrap(), Some(Duration::from_millis(750)));
    }

    #[test]
    fn test_read_request_times_out() {
        let (_client, mut server) = pair();

        let err = read_request(&mut server, Duration::from_millis(50)).unwrap_err();
        assert!(err.contains("failed to read request"));
    }
}
