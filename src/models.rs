//! Modelos de dominio (campos de E/S, nodos y workflows del DSL, plantillas).

use serde::{Deserialize, Serialize};

/// Una ranura de entrada o salida de un nodo.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IoField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// Un paso del workflow. Sólo lo crea el parser y nunca se modifica después;
/// el estado de la UI (expandido/colapsado) vive fuera, indexado por `id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub title: String,
    pub prompt: String,
    pub inputs: Vec<IoField>,
    pub outputs: Vec<IoField>,
}

/// Secuencia ordenada de nodos; el orden es el de ejecución.
/// Se serializa con la forma canónica `{"workflow": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(rename = "workflow")]
    pub nodes: Vec<WorkflowNode>,
}

impl Workflow {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// JSON canónico e indentado, para el panel de DSL en bruto.
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Plantilla de ejemplo obtenida del servicio de plantillas.
/// `payload` se guarda sin interpretar; se parsea al cargarla.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    pub id: String,
    pub title: String,
    #[serde(skip)]
    pub payload: serde_json::Value,
}
