//! Controlador de sesión: compone el gestor de ficheros, el parser y el presentador.
//!
//! Máquina de estados `Idle → Submitting → (éxito | fallo) → Idle`. Mientras hay una
//! petición en vuelo, los nuevos disparos se ignoran (sin cola ni cancelación). Un fallo
//! de red o de parseo nunca toca el workflow mostrado: sólo genera una notificación.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::GenerationModel;
use crate::error::RequestFailed;
use crate::fileset::{BatchResult, FileBlob, FileSet, FileSummary};
use crate::generation::{GenerationRequest, GenerationService, TemplateService};
use crate::models::{Template, Workflow, WorkflowNode};
use crate::preferences::{PreferenceStore, MODEL_KEY};
use crate::presenter::{self, NodeView};
use crate::workflow;

const MAX_NOTIFICATIONS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Submitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

/// Aviso visible para el usuario (el equivalente a un toast).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Resultado de una acción que puede sustituir el workflow mostrado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Ya había una generación en vuelo.
    Ignored,
    NoFiles,
    Replaced { nodes: usize },
    Failed { message: String },
}

/// Foto del estado para la UI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: Phase,
    pub model: GenerationModel,
    pub description: String,
    pub description_chars: usize,
    pub files: Vec<FileSummary>,
    pub max_files: usize,
    pub node_count: usize,
    pub template_count: usize,
}

pub struct Session {
    files: FileSet,
    description: String,
    model: GenerationModel,
    phase: Phase,
    workflow: Option<Workflow>,
    expanded: HashMap<String, bool>,
    templates: Vec<Template>,
    notifications: VecDeque<Notification>,
    preferences: Arc<dyn PreferenceStore>,
}

impl Session {
    /// El modelo se lee una sola vez de las preferencias; si falta o es inválido, `gemini`.
    pub fn new(max_images: usize, max_upload_bytes: u64, preferences: Arc<dyn PreferenceStore>) -> Self {
        let model = match preferences.get(MODEL_KEY) {
            Some(stored) => GenerationModel::from_str(&stored).unwrap_or_else(|e| {
                warn!("Preferencia de modelo ignorada: {}", e);
                GenerationModel::default()
            }),
            None => GenerationModel::default(),
        };

        Self {
            files: FileSet::new(max_images, max_upload_bytes),
            description: String::new(),
            model,
            phase: Phase::Idle,
            workflow: None,
            expanded: HashMap::new(),
            templates: Vec::new(),
            notifications: VecDeque::new(),
            preferences,
        }
    }

    // --- Ficheros ---

    pub fn add_files(&mut self, blobs: Vec<FileBlob>) -> BatchResult {
        let result = self.files.add_batch(blobs);
        for rejection in &result.rejected {
            let message = format!("{}: {}", rejection.candidate.name(), rejection.reason);
            self.notify(NotificationLevel::Error, message);
        }
        result
    }

    /// Índices negativos o fuera de rango no hacen nada.
    pub fn remove_file(&mut self, index: i64) -> bool {
        match usize::try_from(index) {
            Ok(i) => self.files.remove_at(i).is_some(),
            Err(_) => false,
        }
    }

    pub fn reset_files(&mut self) {
        self.files.reset();
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    // --- Descripción y modelo ---

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn model(&self) -> GenerationModel {
        self.model
    }

    /// Efecto inmediato y persistencia síncrona; un fallo al guardar sólo se registra.
    pub fn set_model(&mut self, model: GenerationModel) {
        self.model = model;
        if let Err(e) = self.preferences.set(MODEL_KEY, model.as_str()) {
            warn!("No se pudo guardar la preferencia de modelo: {:#}", e);
        }
        info!("Modelo de generación seleccionado: {}", model);
    }

    // --- Generación ---

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Pasa a `Submitting` y empaqueta la petición, o explica por qué no se envía nada.
    pub fn begin_generation(&mut self) -> Result<GenerationRequest, SessionOutcome> {
        if self.phase == Phase::Submitting {
            info!("Generación ya en curso; se ignora el nuevo disparo");
            return Err(SessionOutcome::Ignored);
        }
        if self.files.is_empty() {
            self.notify(
                NotificationLevel::Error,
                "Selecciona al menos una imagen antes de generar",
            );
            return Err(SessionOutcome::NoFiles);
        }

        self.phase = Phase::Submitting;
        Ok(GenerationRequest {
            model: self.model,
            description: self.description.clone(),
            images: self.files.files().to_vec(),
        })
    }

    pub fn finish_generation(&mut self, result: Result<Value, RequestFailed>) -> SessionOutcome {
        self.phase = Phase::Idle;

        let payload = match result {
            Ok(payload) => payload,
            Err(err) => return self.fail(err.message),
        };

        match workflow::parse_value(&payload) {
            Ok(parsed) => {
                let nodes = parsed.len();
                self.replace_workflow(parsed);
                self.files.reset();
                self.notify(
                    NotificationLevel::Success,
                    format!("Workflow generado con {nodes} nodos"),
                );
                SessionOutcome::Replaced { nodes }
            }
            Err(err) => self.fail(err.to_string()),
        }
    }

    fn fail(&mut self, message: String) -> SessionOutcome {
        warn!("Generación fallida: {}", message);
        self.notify(NotificationLevel::Error, message.clone());
        SessionOutcome::Failed { message }
    }

    // --- Workflow y plantillas ---

    pub fn workflow(&self) -> Option<&Workflow> {
        self.workflow.as_ref()
    }

    fn replace_workflow(&mut self, workflow: Workflow) {
        self.expanded.clear();
        self.workflow = Some(workflow);
    }

    pub fn set_templates(&mut self, templates: Vec<Template>) {
        self.templates = templates;
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Sustituye el workflow con una plantilla ya descargada; no pasa por `Submitting`.
    pub fn load_template(&mut self, index: usize) -> SessionOutcome {
        let Some(template) = self.templates.get(index) else {
            return self.fail(format!("No existe la plantilla {index}"));
        };
        let title = template.title.clone();

        match workflow::parse_value(&template.payload) {
            Ok(parsed) => {
                let nodes = parsed.len();
                self.replace_workflow(parsed);
                info!("Plantilla '{}' cargada ({} nodos)", title, nodes);
                self.notify(NotificationLevel::Success, format!("Ejemplo cargado: {title}"));
                SessionOutcome::Replaced { nodes }
            }
            Err(err) => self.fail(err.to_string()),
        }
    }

    // --- Estado de la UI por nodo ---

    /// Devuelve el nuevo estado, o `None` si el id no existe en el workflow actual.
    pub fn toggle_node(&mut self, id: &str) -> Option<bool> {
        self.node(id)?;
        let expanded = self.expanded.entry(id.to_string()).or_insert(false);
        *expanded = !*expanded;
        Some(*expanded)
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.get(id).copied().unwrap_or(false)
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.workflow.as_ref().and_then(|wf| wf.node(id))
    }

    pub fn node_views(&self) -> Vec<NodeView> {
        self.workflow
            .iter()
            .flat_map(|wf| wf.nodes.iter())
            .map(|node| presenter::present(node, self.is_expanded(&node.id)))
            .collect()
    }

    // --- Notificaciones ---

    pub fn notify(&mut self, level: NotificationLevel, message: impl Into<String>) {
        if self.notifications.len() == MAX_NOTIFICATIONS {
            self.notifications.pop_front();
        }
        self.notifications.push_back(Notification {
            level,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            model: self.model,
            description: self.description.clone(),
            description_chars: self.description.chars().count(),
            files: self.files.summaries(),
            max_files: self.files.max_count(),
            node_count: self.workflow.as_ref().map_or(0, Workflow::len),
            template_count: self.templates.len(),
        }
    }
}

/// Handle compartido: la sesión tras un mutex que nunca se mantiene durante un `.await`.
#[derive(Clone)]
pub struct SessionController {
    session: Arc<Mutex<Session>>,
    generator: Arc<dyn GenerationService>,
    template_source: Arc<dyn TemplateService>,
}

impl SessionController {
    pub fn new(
        session: Session,
        generator: Arc<dyn GenerationService>,
        template_source: Arc<dyn TemplateService>,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            generator,
            template_source,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ejecuta `f` con acceso exclusivo a la sesión.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn begin_generation(&self) -> Result<GenerationRequest, SessionOutcome> {
        self.lock().begin_generation()
    }

    pub async fn complete_generation(&self, request: GenerationRequest) -> SessionOutcome {
        info!(
            "Generación iniciada: modelo {}, {} imágenes",
            request.model,
            request.images.len()
        );
        let result = self.generator.generate(request).await;
        let outcome = self.lock().finish_generation(result);
        info!("Generación terminada: {:?}", outcome);
        outcome
    }

    pub async fn generate(&self) -> SessionOutcome {
        match self.begin_generation() {
            Ok(request) => self.complete_generation(request).await,
            Err(outcome) => outcome,
        }
    }

    /// Descarga de nuevo las plantillas; la caché sólo se sustituye si la descarga funciona.
    pub async fn refresh_templates(&self) -> Result<usize, RequestFailed> {
        let templates = self.template_source.fetch_templates().await?;
        let count = templates.len();
        self.lock().set_templates(templates);
        info!("{} plantillas disponibles", count);
        Ok(count)
    }
}
