//! # Construcción de Respuestas HTTP
//! src/http/response.rs
//!
//! Respuestas HTTP/1.0 con `Content-Length` exacto. El servidor cierra la
//! conexión después de cada respuesta, así que no hay keep-alive.
//!
//! ## Ejemplo de uso
//!
//! ```
//! use event_loop_server::http::{Response, StatusCode};
//!
//! let response = Response::text(StatusCode::Ok, "TimerAsync")
//!     .with_header("X-Strategy", "TimerAsync");
//!
//! let raw = String::from_utf8(response.to_bytes()).unwrap();
//! assert!(raw.starts_with("HTTP/1.0 200 OK\r\n"));
//! assert!(raw.contains("Content-Length: 10\r\n"));
//! assert!(raw.ends_with("\r\n\r\nTimerAsync"));
//! ```

use super::StatusCode;

/// Respuesta HTTP/1.0 completa
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    /// Headers en orden de inserción; un nombre repetido reemplaza al anterior
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    /// Respuesta sin headers ni body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Respuesta `text/plain` con el body dado
    pub fn text(status: StatusCode, body: &str) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.as_bytes().to_vec())
    }

    /// Respuesta de error con body JSON `{"error": "..."}`
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body.into_bytes())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Establece el body y su `Content-Length`
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        let length = self.body.len().to_string();
        self.set_header("Content-Length", &length);
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Serializa status line, headers, línea vacía y body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.0 {}\r\n", self.status);
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
