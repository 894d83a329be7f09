//! Carga y gestión de configuración de la aplicación (servidor + servicio de generación).

use std::env;
use std::fmt;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Modelo que el servicio de generación debe usar para producir el DSL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationModel {
    #[default]
    Gemini,
    OpenAI,
}

impl GenerationModel {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Modelo de generación no soportado: {other}")),
        }
    }

    /// Identificador tal y como viaja en la query `?model=` y en la preferencia.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAI => "openai",
        }
    }
}

impl fmt::Display for GenerationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub generation_service_url: Url,
    pub max_images: usize,
    pub max_upload_bytes: u64,
    pub preferences_path: PathBuf,
    pub frontend_dir: PathBuf,
    pub open_browser: bool,
}

pub const DEFAULT_MAX_IMAGES: usize = 10;
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 5;

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let service_url_str = env::var("GENERATION_SERVICE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
        let generation_service_url = Url::parse(&service_url_str)
            .with_context(|| format!("GENERATION_SERVICE_URL no es una URL válida: {service_url_str}"))?;

        let max_images = parse_var("MAX_IMAGES", DEFAULT_MAX_IMAGES)?;
        let max_upload_mb: u64 = parse_var("MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)?;

        let preferences_path = match env::var("PREFERENCES_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_preferences_path()?,
        };

        let frontend_dir =
            PathBuf::from(env::var("FRONTEND_DIR").unwrap_or_else(|_| "frontend".to_string()));

        let open_browser = match env::var("OPEN_BROWSER") {
            Ok(v) => parse_bool(&v)
                .ok_or_else(|| anyhow!("OPEN_BROWSER debe ser true/false, no '{v}'"))?,
            Err(_) => true,
        };

        Ok(Self {
            server_addr,
            generation_service_url,
            max_images,
            max_upload_bytes: mb_to_bytes(max_upload_mb)?,
            preferences_path,
            frontend_dir,
            open_browser,
        })
    }
}

fn mb_to_bytes(mb: u64) -> Result<u64> {
    mb.checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow!("MAX_UPLOAD_MB demasiado grande: {mb}"))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Valor inválido para {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_preferences_path() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| anyhow!("No se pudo determinar el directorio de configuración del usuario"))?;
    Ok(base.join("gui-agent-workflow").join("preferences.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_parsing_is_case_insensitive() {
        assert_eq!(GenerationModel::from_str("Gemini").unwrap(), GenerationModel::Gemini);
        assert_eq!(GenerationModel::from_str(" OPENAI ").unwrap(), GenerationModel::OpenAI);
        assert!(GenerationModel::from_str("claude").is_err());
    }

    #[test]
    fn model_round_trips_through_its_identifier() {
        for model in [GenerationModel::Gemini, GenerationModel::OpenAI] {
            assert_eq!(GenerationModel::from_str(model.as_str()).unwrap(), model);
        }
        assert_eq!(GenerationModel::default(), GenerationModel::Gemini);
    }

    #[test]
    fn bool_values() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn upload_size_is_converted_without_overflow() {
        assert_eq!(mb_to_bytes(5).unwrap(), 5 * 1024 * 1024);
        assert_eq!(mb_to_bytes(0).unwrap(), 0);
        assert!(mb_to_bytes(u64::MAX).is_err());
        assert!(mb_to_bytes(u64::MAX / (1024 * 1024) + 1).is_err());
    }
}
