use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};

use crate::{
    app_state::AppState,
    config::GenerationModel,
    error::RejectReason,
    fileset::{FileBlob, FileSummary},
    presenter::{self, NodeView},
    session::{NotificationLevel, SessionOutcome},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct DescriptionPayload {
    description: String,
}

#[derive(Deserialize)]
pub struct ModelPayload {
    model: String,
}

#[derive(Serialize)]
pub struct RejectedFile {
    name: String,
    reason: RejectReason,
    message: String,
}

#[derive(Serialize)]
pub struct UploadResponse {
    accepted: Vec<FileSummary>,
    rejected: Vec<RejectedFile>,
    files: Vec<FileSummary>,
}

#[derive(Serialize)]
pub struct WorkflowResponse {
    nodes: Vec<NodeView>,
}

#[derive(Serialize)]
pub struct TemplateInfo {
    index: usize,
    id: String,
    title: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route(
            "/api/files",
            post(upload_files_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/files/reset", post(reset_files_handler))
        .route("/api/files/:index", delete(remove_file_handler))
        .route("/api/description", put(description_handler))
        .route("/api/model", get(get_model_handler).put(set_model_handler))
        .route("/api/generate", post(generate_handler))
        .route("/api/workflow", get(workflow_handler))
        .route("/api/workflow/raw", get(raw_workflow_handler))
        .route("/api/nodes/:id/toggle", post(toggle_node_handler))
        .route("/api/nodes/:id/copy", get(copy_node_handler))
        .route("/api/templates", get(list_templates_handler))
        .route("/api/templates/refresh", post(refresh_templates_handler))
        .route("/api/templates/:index/load", post(load_template_handler))
        .route("/api/notifications", get(notifications_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.with_session(|s| s.status()))
}

/// Sólo los campos con nombre de fichero se tratan como imágenes candidatas.
/// Cada fichero se lee por trozos; al pasar de `max_upload_bytes` se descartan sus bytes
/// y sólo se cuenta el tamaño, así un fichero enorme se rechaza sin tumbar el lote.
#[axum::debug_handler]
async fn upload_files_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let max_bytes = state.config.max_upload_bytes;
    let mut blobs = Vec::new();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Formulario inválido: {e}")))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let mut data = Vec::new();
        let mut seen: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("No se pudo leer {file_name}: {e}"),
            )
        })? {
            seen += chunk.len() as u64;
            if seen <= max_bytes {
                data.extend_from_slice(&chunk);
            } else if !data.is_empty() {
                data = Vec::new();
            }
        }

        let blob = if seen > max_bytes {
            FileBlob::oversized(file_name, content_type, seen)
        } else {
            FileBlob::new(file_name, content_type, data)
        };
        blobs.push(blob);
    }

    let (result, files) = state.controller.with_session(|s| {
        let result = s.add_files(blobs);
        (result, s.files().summaries())
    });
    info!(
        "Subida: {} aceptadas, {} rechazadas",
        result.accepted.len(),
        result.rejected.len()
    );

    Ok(Json(UploadResponse {
        accepted: result.accepted,
        rejected: result
            .rejected
            .iter()
            .map(|r| RejectedFile {
                name: r.candidate.name().to_string(),
                reason: r.reason,
                message: r.reason.to_string(),
            })
            .collect(),
        files,
    }))
}

#[axum::debug_handler]
async fn remove_file_handler(
    State(state): State<AppState>,
    Path(index): Path<i64>,
) -> impl IntoResponse {
    let (removed, files) = state
        .controller
        .with_session(|s| (s.remove_file(index), s.files().summaries()));
    Json(json!({ "removed": removed, "files": files }))
}

#[axum::debug_handler]
async fn reset_files_handler(State(state): State<AppState>) -> StatusCode {
    state.controller.with_session(|s| s.reset_files());
    StatusCode::NO_CONTENT
}

#[axum::debug_handler]
async fn description_handler(
    State(state): State<AppState>,
    Json(payload): Json<DescriptionPayload>,
) -> impl IntoResponse {
    let chars = payload.description.chars().count();
    state
        .controller
        .with_session(|s| s.set_description(payload.description));
    Json(json!({ "description_chars": chars }))
}

#[axum::debug_handler]
async fn get_model_handler(State(state): State<AppState>) -> impl IntoResponse {
    let model = state.controller.with_session(|s| s.model());
    Json(json!({ "model": model }))
}

#[axum::debug_handler]
async fn set_model_handler(
    State(state): State<AppState>,
    Json(payload): Json<ModelPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let model = GenerationModel::from_str(&payload.model)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    state.controller.with_session(|s| s.set_model(model));
    Ok(Json(json!({ "model": model })))
}

/// La petición se lanza en segundo plano; la UI consulta `/api/status` hasta volver a `idle`.
#[axum::debug_handler]
async fn generate_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    match state.controller.begin_generation() {
        Ok(request) => {
            let controller = state.controller.clone();
            spawn(async move {
                controller.complete_generation(request).await;
            });
            Ok((StatusCode::ACCEPTED, Json(json!({ "outcome": "started" }))))
        }
        Err(SessionOutcome::Ignored) => Err(api_error(
            StatusCode::CONFLICT,
            "Ya hay una generación en curso.",
        )),
        Err(SessionOutcome::NoFiles) => Err(api_error(
            StatusCode::BAD_REQUEST,
            "Selecciona al menos una imagen antes de generar.",
        )),
        Err(other) => Ok((StatusCode::OK, Json(json!(other)))),
    }
}

#[axum::debug_handler]
async fn workflow_handler(State(state): State<AppState>) -> Json<WorkflowResponse> {
    let nodes = state.controller.with_session(|s| s.node_views());
    Json(WorkflowResponse { nodes })
}

#[axum::debug_handler]
async fn raw_workflow_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let text = state
        .controller
        .with_session(|s| s.workflow().map(|wf| wf.to_pretty_json()))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Todavía no hay ningún workflow."))?
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], text))
}

#[axum::debug_handler]
async fn toggle_node_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let expanded = state
        .controller
        .with_session(|s| s.toggle_node(&id))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Nodo desconocido: {id}")))?;
    Ok(Json(json!({ "id": id, "expanded": expanded })))
}

#[axum::debug_handler]
async fn copy_node_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let text = state
        .controller
        .with_session(|s| s.node(&id).map(presenter::serialize))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Nodo desconocido: {id}")))?
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], text))
}

#[axum::debug_handler]
async fn list_templates_handler(State(state): State<AppState>) -> impl IntoResponse {
    let templates: Vec<TemplateInfo> = state.controller.with_session(|s| {
        s.templates()
            .iter()
            .enumerate()
            .map(|(index, t)| TemplateInfo {
                index,
                id: t.id.clone(),
                title: t.title.clone(),
            })
            .collect()
    });
    Json(json!({ "templates": templates }))
}

#[axum::debug_handler]
async fn refresh_templates_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    match state.controller.refresh_templates().await {
        Ok(count) => Ok(Json(json!({ "count": count }))),
        Err(err) => {
            error!("Error obteniendo plantillas: {}", err);
            state
                .controller
                .with_session(|s| s.notify(NotificationLevel::Error, err.message.clone()));
            Err(api_error(StatusCode::BAD_GATEWAY, err.message))
        }
    }
}

#[axum::debug_handler]
async fn load_template_handler(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<impl IntoResponse, ApiError> {
    match state.controller.with_session(|s| s.load_template(index)) {
        SessionOutcome::Failed { message } => {
            Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, message))
        }
        outcome => Ok(Json(json!(outcome))),
    }
}

#[axum::debug_handler]
async fn notifications_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.with_session(|s| s.drain_notifications()))
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::RequestFailed;
    use crate::generation::{GenerationRequest, GenerationService, TemplateService};
    use crate::models::Template;
    use crate::preferences::{MemoryPreferenceStore, PreferenceStore, MODEL_KEY};
    use crate::session::{Session, SessionController};
    use async_trait::async_trait;
    use reqwest::multipart::{Form, Part};
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use url::Url;

    struct HeldGenerator {
        release: Notify,
    }

    #[async_trait]
    impl GenerationService for HeldGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<Value, RequestFailed> {
            self.release.notified().await;
            let nodes: Vec<Value> = request
                .images
                .iter()
                .map(|img| json!({"title": img.name()}))
                .collect();
            Ok(json!({ "workflow": nodes }))
        }
    }

    struct FixedTemplates;

    #[async_trait]
    impl TemplateService for FixedTemplates {
        async fn fetch_templates(&self) -> Result<Vec<Template>, RequestFailed> {
            Ok(vec![Template {
                id: "login".into(),
                title: "Login".into(),
                payload: json!({"workflow": [
                    {"id": "open", "title": "Abrir", "prompt": "Abre la web",
                     "inputs": [{"name": "url", "type": "string", "desc": "dirección"}]},
                    {"id": "submit", "title": "Enviar"}
                ]}),
            }])
        }
    }

    struct Harness {
        base: Url,
        client: reqwest::Client,
        generator: Arc<HeldGenerator>,
        preferences: Arc<MemoryPreferenceStore>,
    }

    impl Harness {
        fn url(&self, path: &str) -> Url {
            self.base.join(path).unwrap()
        }
    }

    async fn start() -> Harness {
        let config = AppConfig {
            server_addr: "127.0.0.1:0".into(),
            generation_service_url: Url::parse("http://127.0.0.1:9").unwrap(),
            max_images: 2,
            max_upload_bytes: 64,
            preferences_path: PathBuf::from("unused.json"),
            frontend_dir: PathBuf::from("frontend"),
            open_browser: false,
        };
        let generator = Arc::new(HeldGenerator {
            release: Notify::new(),
        });
        let preferences = Arc::new(MemoryPreferenceStore::default());
        let session = Session::new(config.max_images, config.max_upload_bytes, preferences.clone());
        let controller = SessionController::new(session, generator.clone(), Arc::new(FixedTemplates));
        let (state, _shutdown_rx) = AppState::new(config, controller);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Harness {
            base: Url::parse(&format!("http://{addr}/")).unwrap(),
            client: reqwest::Client::new(),
            generator,
            preferences,
        }
    }

    fn image(name: &str, size: usize) -> Part {
        Part::bytes(vec![7u8; size])
            .file_name(name.to_string())
            .mime_str("image/png")
            .unwrap()
    }

    async fn upload(h: &Harness, form: Form) -> Value {
        h.client
            .post(h.url("api/files"))
            .multipart(form)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn status(h: &Harness) -> Value {
        h.client
            .get(h.url("api/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upload_reports_each_rejection() {
        let h = start().await;
        let form = Form::new()
            .part("images", image("a.png", 10))
            .part("images", image("big.png", 65))
            .part(
                "images",
                Part::bytes(vec![1]).file_name("notes.txt").mime_str("text/plain").unwrap(),
            )
            .part("images", image("b.png", 64))
            .part("images", image("c.png", 1))
            .text("description", "ignored");

        let body = upload(&h, form).await;
        let accepted: Vec<_> = body["accepted"].as_array().unwrap().iter().map(|f| f["name"].clone()).collect();
        assert_eq!(accepted, vec![json!("a.png"), json!("b.png")]);
        let reasons: Vec<_> = body["rejected"].as_array().unwrap().iter().map(|r| r["reason"].clone()).collect();
        assert_eq!(reasons, vec![json!("TooLarge"), json!("NotAnImage"), json!("TooMany")]);

        assert_eq!(status(&h).await["files"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn oversized_file_does_not_sink_the_batch() {
        let h = start().await;
        let form = Form::new()
            .part("images", image("small.png", 4))
            .part("images", image("huge.png", 2 * 1024 * 1024));

        let body = upload(&h, form).await;
        assert_eq!(body["accepted"][0]["name"], "small.png");
        assert_eq!(body["accepted"].as_array().unwrap().len(), 1);
        assert_eq!(body["rejected"][0]["name"], "huge.png");
        assert_eq!(body["rejected"][0]["reason"], "TooLarge");
        assert_eq!(status(&h).await["files"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broken_upload_reports_a_json_error() {
        let h = start().await;
        let truncated = "--x\r\nContent-Disposition: form-data; name=\"images\"; filename=\"a.png\"\r\n\r\nabc";
        let resp = h
            .client
            .post(h.url("api/files"))
            .header("content-type", "multipart/form-data; boundary=x")
            .body(truncated)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert!(!body["error"].as_str().unwrap().is_empty());
        assert!(status(&h).await["files"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn description_length_counts_characters() {
        let h = start().await;
        let body: Value = h
            .client
            .put(h.url("api/description"))
            .json(&json!({ "description": "登录🚀a" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["description_chars"], 4);
    }

    #[tokio::test]
    async fn remove_with_bad_index_is_a_noop() {
        let h = start().await;
        upload(&h, Form::new().part("images", image("a.png", 1))).await;

        for index in ["-1", "5"] {
            let body: Value = h
                .client
                .delete(h.url(&format!("api/files/{index}")))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(body["removed"], false);
            assert_eq!(body["files"].as_array().unwrap().len(), 1);
        }

        let body: Value = h.client.delete(h.url("api/files/0")).send().await.unwrap().json().await.unwrap();
        assert_eq!(body["removed"], true);
    }

    #[tokio::test]
    async fn generate_guards_against_double_submission() {
        let h = start().await;

        let empty = h.client.post(h.url("api/generate")).send().await.unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        upload(&h, Form::new().part("images", image("login.png", 4))).await;
        let first = h.client.post(h.url("api/generate")).send().await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let second = h.client.post(h.url("api/generate")).send().await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(status(&h).await["phase"], "submitting");

        h.generator.release.notify_one();
        let mut phase = Value::Null;
        for _ in 0..200 {
            phase = status(&h).await["phase"].clone();
            if phase == "idle" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(phase, "idle");

        let wf: Value = h.client.get(h.url("api/workflow")).send().await.unwrap().json().await.unwrap();
        assert_eq!(wf["nodes"][0]["title"], "login.png");
        assert_eq!(wf["nodes"][0]["id"], "node-0");
    }

    #[tokio::test]
    async fn model_preference_is_validated_and_persisted() {
        let h = start().await;
        let bad = h
            .client
            .put(h.url("api/model"))
            .json(&json!({"model": "llama"}))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let ok = h
            .client
            .put(h.url("api/model"))
            .json(&json!({"model": "OpenAI"}))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(h.preferences.get(MODEL_KEY).as_deref(), Some("openai"));
        assert_eq!(status(&h).await["model"], "openai");
    }

    #[tokio::test]
    async fn template_load_toggle_and_copy() {
        let h = start().await;
        let refreshed: Value = h.client.post(h.url("api/templates/refresh")).send().await.unwrap().json().await.unwrap();
        assert_eq!(refreshed["count"], 1);

        let missing = h.client.post(h.url("api/templates/3/load")).send().await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let loaded: Value = h.client.post(h.url("api/templates/0/load")).send().await.unwrap().json().await.unwrap();
        assert_eq!(loaded, json!({"outcome": "replaced", "nodes": 2}));

        let toggled: Value = h.client.post(h.url("api/nodes/open/toggle")).send().await.unwrap().json().await.unwrap();
        assert_eq!(toggled["expanded"], true);
        let wf: Value = h.client.get(h.url("api/workflow")).send().await.unwrap().json().await.unwrap();
        assert_eq!(wf["nodes"][0]["details"]["inputs"][0], "url (string) - dirección");
        assert!(wf["nodes"][1].get("details").is_none());

        let first = h.client.get(h.url("api/nodes/open/copy")).send().await.unwrap().text().await.unwrap();
        let second = h.client.get(h.url("api/nodes/open/copy")).send().await.unwrap().text().await.unwrap();
        assert_eq!(first, second);
        let copied: Value = serde_json::from_str(&first).unwrap();
        assert_eq!(copied["inputs"][0]["description"], "dirección");

        let unknown = h.client.get(h.url("api/nodes/nope/copy")).send().await.unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let notes: Value = h.client.get(h.url("api/notifications")).send().await.unwrap().json().await.unwrap();
        let levels: Vec<_> = notes.as_array().unwrap().iter().map(|n| n["level"].clone()).collect();
        assert_eq!(levels, vec![json!("error"), json!("success")]);
    }
}
