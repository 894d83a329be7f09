//! Colaboradores remotos: servicio de generación del DSL y servicio de plantillas.
//! Ambos se abstraen tras traits para que la sesión pueda probarse sin red.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{error, info, warn};
use url::Url;

use crate::config::{AppConfig, GenerationModel};
use crate::error::RequestFailed;
use crate::fileset::UploadCandidate;
use crate::models::Template;

/// Petición empaquetada por la sesión: imágenes en orden, descripción y modelo.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: GenerationModel,
    pub description: String,
    pub images: Vec<UploadCandidate>,
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Devuelve el cuerpo JSON sin interpretar; el parser resuelve `dsl`/`workflow`.
    async fn generate(&self, request: GenerationRequest) -> Result<Value, RequestFailed>;
}

#[async_trait]
pub trait TemplateService: Send + Sync {
    async fn fetch_templates(&self) -> Result<Vec<Template>, RequestFailed>;
}

/// Cliente HTTP que habla con el backend de generación.
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGenerationClient {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(cfg.generation_service_url.clone())
    }

    pub fn new(mut base_url: Url) -> Self {
        // Sin barra final, `Url::join` sustituiría el último segmento de la ruta base.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RequestFailed> {
        self.base_url.join(path).map_err(|e| {
            error!("URL inválida para {}: {}", path, e);
            RequestFailed::generic(None)
        })
    }
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<Value, RequestFailed> {
        let url = self.endpoint("api/generateDsl")?;

        let mut form = Form::new();
        for image in &request.images {
            let part = Part::bytes(image.data().to_vec())
                .file_name(image.name().to_string())
                .mime_str(image.mime_type())
                .map_err(|e| {
                    error!("Tipo MIME inválido para {}: {}", image.name(), e);
                    RequestFailed::generic(None)
                })?;
            form = form.part("images", part);
        }
        form = form.text("description", request.description);

        info!(
            "Solicitando DSL a {} (modelo {}, {} imágenes)",
            url,
            request.model,
            request.images.len()
        );

        let response = self
            .client
            .post(url)
            .query(&[("model", request.model.as_str())])
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!("Error de red contactando con el servicio de generación: {}", e);
                RequestFailed::generic(None)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<Value>().await.ok();
            let err = RequestFailed::from_error_body(Some(status.as_u16()), body.as_ref());
            error!("El servicio de generación respondió {}: {}", status, err);
            return Err(err);
        }

        let text = response.text().await.map_err(|e| {
            error!("No se pudo leer la respuesta de generación: {}", e);
            RequestFailed::generic(Some(status.as_u16()))
        })?;

        // Un cuerpo que no es JSON llega al parser como texto y acaba en `MalformedWorkflow`.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
impl TemplateService for HttpGenerationClient {
    async fn fetch_templates(&self) -> Result<Vec<Template>, RequestFailed> {
        let url = self.endpoint("api/templates")?;
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!("Error de red obteniendo plantillas: {}", e);
            RequestFailed::generic(None)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<Value>().await.ok();
            return Err(RequestFailed::from_error_body(Some(status.as_u16()), body.as_ref()));
        }

        let body: Value = response.json().await.map_err(|e| {
            warn!("Respuesta de plantillas no es JSON: {}", e);
            RequestFailed::generic(Some(status.as_u16()))
        })?;
        templates_from_value(&body)
    }
}

/// Interpreta la lista de plantillas. El backend de referencia devuelve el fichero
/// como una cadena JSON, así que se acepta también el array codificado dentro de un string.
pub fn templates_from_value(body: &Value) -> Result<Vec<Template>, RequestFailed> {
    let decoded;
    let body = match body {
        Value::String(text) => {
            decoded = serde_json::from_str::<Value>(text).map_err(|e| {
                warn!("El texto de plantillas no es JSON: {}", e);
                RequestFailed::new(None, "Las plantillas recibidas no son válidas")
            })?;
            &decoded
        }
        other => other,
    };

    let items = match body {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("templates") {
            Some(Value::Array(items)) => items,
            _ => return Ok(vec![template_from_item(0, body)]),
        },
        _ => return Err(RequestFailed::new(None, "Las plantillas recibidas no son válidas")),
    };

    Ok(items
        .iter()
        .enumerate()
        .map(|(index, item)| template_from_item(index, item))
        .collect())
}

fn template_from_item(index: usize, item: &Value) -> Template {
    let text = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };

    Template {
        id: text("id").unwrap_or_else(|| format!("template-{index}")),
        title: text("title")
            .or_else(|| text("name"))
            .unwrap_or_else(|| format!("Plantilla {}", index + 1)),
        payload: item.get("dsl").cloned().unwrap_or_else(|| item.clone()),
    }
}
