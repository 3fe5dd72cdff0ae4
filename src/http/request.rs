//! # Parsing de Requests HTTP
//! src/http/request.rs
//!
//! El harness acepta cualquier método y cualquier path: el request solo se
//! parsea para validar que sea HTTP y para los logs. La respuesta depende
//! únicamente de la estrategia del listener.
//!
//! ## Formato
//!
//! ```text
//! METHOD /path?query HTTP/1.x\r\n
//! Header-Name: Header-Value\r\n
//! \r\n
//! [body]
//! ```

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Método HTTP. Los métodos no estándar se conservan tal cual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Result<Self, ParseError> {
        // RFC 7230: el método es un token, sin separadores ni controles
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)) {
            return Err(ParseError::InvalidMethod(token.to_string()));
        }

        Ok(match token {
            "GET" => Method::GET,
            "HEAD" => Method::HEAD,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            other => Method::Other(other.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::Other(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request HTTP parseado
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    /// Path sin la query string
    path: String,
    query: Option<String>,
    headers: HashMap<String, String>,
    version: String,
    body: Vec<u8>,
}

/// Errores de parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty request")]
    EmptyRequest,

    #[error("Incomplete HTTP request")]
    IncompleteRequest,

    #[error("Invalid request line format")]
    InvalidRequestLine,

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidHttpVersion(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// Separador entre headers y body
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

impl Request {
    /// Indica si `buffer` ya contiene la request line y todos los headers
    pub fn head_complete(buffer: &[u8]) -> bool {
        buffer.windows(HEAD_TERMINATOR.len()).any(|w| w == HEAD_TERMINATOR)
    }

    /// Parsea un request HTTP/1.0 o HTTP/1.1 desde bytes
    ///
    /// # Ejemplo
    ///
    /// ```
    /// use event_loop_server::http::Request;
    ///
    /// let raw = b"PATCH /anything?x=1 HTTP/1.1\r\nHost: localhost\r\n\r\n";
    /// let request = Request::parse(raw).unwrap();
    ///
    /// assert_eq!(request.method().as_str(), "PATCH");
    /// assert_eq!(request.path(), "/anything");
    /// assert_eq!(request.query(), Some("x=1"));
    /// ```
    pub fn parse(buffer: &[u8]) -> Result<Self, ParseError> {
        if buffer.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::EmptyRequest);
        }

        let head_end = buffer
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
            .ok_or(ParseError::IncompleteRequest)?;

        let head = std::str::from_utf8(&buffer[..head_end]).map_err(|_| ParseError::InvalidRequestLine)?;
        let mut lines = head.split("\r\n");

        let request_line = lines.next().ok_or(ParseError::IncompleteRequest)?;
        let (method, target, version) = Self::parse_request_line(request_line)?;

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };

        let headers = Self::parse_headers(lines)?;
        let body = buffer[head_end + HEAD_TERMINATOR.len()..].to_vec();

        Ok(Request {
            method,
            path,
            query,
            headers,
            version,
            body,
        })
    }

    /// Formato: `METHOD target HTTP/1.x`
    fn parse_request_line(line: &str) -> Result<(Method, &str, String), ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ParseError::InvalidRequestLine);
        }

        let method = Method::parse(parts[0])?;

        let version = parts[2];
        if version != "HTTP/1.0" && version != "HTTP/1.1" {
            return Err(ParseError::InvalidHttpVersion(version.to_string()));
        }

        Ok((method, parts[1], version.to_string()))
    }

    fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<HashMap<String, String>, ParseError> {
        let mut headers = HashMap::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::InvalidHeader(line.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ParseError::InvalidHeader(line.to_string()));
            }
            headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
        }
        Ok(headers)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string sin decodificar, si la hay
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Busca un header sin distinguir mayúsculas
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Bytes recibidos después de los headers
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_get() {
        let request = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.path(), "/");
        assert_eq!(request.query(), None);
        assert_eq!(request.version(), "HTTP/1.0");
    }

    #[test]
    fn test_any_method_is_accepted() {
        for method in ["POST", "PUT", "DELETE", "OPTIONS", "PATCH", "BREW"] {
            let raw = format!("{} /x HTTP/1.1\r\n\r\n", method);
            let request = Request::parse(raw.as_bytes()).unwrap();
            assert_eq!(request.method().as_str(), method);
        }
    }

    #[test]
    fn test_invalid_method_token() {
        let result = Request::parse(b"GE(T / HTTP/1.0\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidMethod(_))));
    }

    #[test]
    fn test_path_and_query_split() {
        let request = Request::parse(b"GET /a/b?num=10&x HTTP/1.0\r\n\r\n").unwrap();

        assert_eq!(request.path(), "/a/b");
        assert_eq!(request.query(), Some("num=10&x"));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost:8000\r\nUser-Agent: test\r\n\r\n";
        let request = Request::parse(raw).unwrap();

        assert_eq!(request.header("host"), Some("localhost:8000"));
        assert_eq!(request.header("USER-AGENT"), Some("test"));
        assert_eq!(request.headers().len(), 2);
    }

    #[test]
    fn test_body_after_head() {
        let raw = b"POST /submit HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello";
        let request = Request::parse(raw).unwrap();

        assert_eq!(request.body(), b"hello");
    }

    #[test]
    fn test_head_complete() {
        assert!(!Request::head_complete(b"GET / HTTP/1.0\r\nHost: x\r\n"));
        assert!(Request::head_complete(b"GET / HTTP/1.0\r\nHost: x\r\n\r\n"));
    }

    #[test]
    fn test_incomplete_request() {
        let result = Request::parse(b"GET / HTTP/1.0\r\nHost: x\r\n");
        assert_eq!(result.unwrap_err(), ParseError::IncompleteRequest);
    }

    #[test]
    fn test_invalid_version() {
        let result = Request::parse(b"GET / HTTP/2.0\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidHttpVersion(_))));
    }

    #[test]
    fn test_empty_request() {
        assert_eq!(Request::parse(b"").unwrap_err(), ParseError::EmptyRequest);
        assert_eq!(Request::parse(b"\r\n\r\n").unwrap_err(), ParseError::EmptyRequest);
    }

    #[test]
    fn test_invalid_request_line() {
        let result = Request::parse(b"GET\r\n\r\n");
        assert_eq!(result.unwrap_err(), ParseError::InvalidRequestLine);
    }

    #[test]
    fn test_invalid_header() {
        let result = Request::parse(b"GET / HTTP/1.0\r\nno-colon-here\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidHeader(_))));
    }
}
