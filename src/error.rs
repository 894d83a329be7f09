//! Taxonomía de errores del dominio. Ninguno es fatal: todos dejan la sesión en `Idle`.

use serde::Serialize;
use thiserror::Error;

/// Motivo por el que un fichero no entra en el conjunto de subida.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    #[error("se ha alcanzado el número máximo de imágenes")]
    TooMany,
    #[error("el fichero supera el tamaño máximo permitido")]
    TooLarge,
    #[error("el fichero no es una imagen")]
    NotAnImage,
}

/// El documento recibido no puede interpretarse como workflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Workflow malformado: {0}")]
pub struct MalformedWorkflow(pub String);

/// Mensaje genérico cuando el servicio no aporta un `detail` legible.
pub const GENERIC_REQUEST_FAILURE: &str = "La generación ha fallado";

/// Fallo de red o del servicio remoto.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RequestFailed {
    pub status: Option<u16>,
    pub message: String,
}

impl RequestFailed {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Construye el error a partir del cuerpo JSON de una respuesta HTTP fallida:
    /// el campo `detail` se muestra tal cual; si falta, se usa el mensaje genérico.
    pub fn from_error_body(status: Option<u16>, body: Option<&serde_json::Value>) -> Self {
        let detail = body
            .and_then(|b| b.get("detail"))
            .and_then(|d| d.as_str())
            .filter(|d| !d.trim().is_empty());
        Self::new(status, detail.unwrap_or(GENERIC_REQUEST_FAILURE))
    }

    pub fn generic(status: Option<u16>) -> Self {
        Self::new(status, GENERIC_REQUEST_FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_is_surfaced_verbatim() {
        let body = json!({"detail": "quota exceeded"});
        let err = RequestFailed::from_error_body(Some(429), Some(&body));
        assert_eq!(err.message, "quota exceeded");
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(err.status, Some(429));
    }

    #[test]
    fn missing_or_non_string_detail_falls_back() {
        let validation = json!({"detail": [{"loc": ["query", "model"], "msg": "bad"}]});
        assert_eq!(
            RequestFailed::from_error_body(Some(422), Some(&validation)).message,
            GENERIC_REQUEST_FAILURE
        );
        assert_eq!(
            RequestFailed::from_error_body(Some(500), Some(&json!({}))).message,
            GENERIC_REQUEST_FAILURE
        );
        assert_eq!(RequestFailed::from_error_body(None, None).message, GENERIC_REQUEST_FAILURE);
    }
}
