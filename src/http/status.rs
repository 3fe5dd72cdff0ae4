//! # Códigos de Estado HTTP
//! src/http/status.rs
//!
//! Solo los códigos que el harness escribe: 200 para trabajo completado,
//! 400 para requests malformados y 500 cuando la unidad de trabajo falla.

/// Códigos de estado que usa el servidor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 200 OK - El trabajo terminó y el body es el identificador de la estrategia
    Ok = 200,

    /// 400 Bad Request - El request no se pudo parsear
    BadRequest = 400,

    /// 500 Internal Server Error - La unidad de trabajo falló
    InternalServerError = 500,
}

impl StatusCode {
    /// # Ejemplo
    /// ```
    /// use event_loop_server::http::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// ```
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }
}

impl std::fmt::Display for StatusCode {
    /// Formato: "200 OK"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_values() {
        assert_eq!(StatusCode::Ok.as_u16(), 200);
        assert_eq!(StatusCode::BadRequest.as_u16(), 400);
        assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
    }

    #[test]
    fn test_is_success() {
        assert!(StatusCode::Ok.is_success());
        assert!(!StatusCode::BadRequest.is_success());
        assert!(!StatusCode::InternalServerError.is_success());
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::Ok.to_string(), "200 OK");
        assert_eq!(StatusCode::InternalServerError.to_string(), "500 Internal Server Error");
    }
}
