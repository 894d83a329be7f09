//! Presentación de nodos: transformación pura de `WorkflowNode` + flag `expanded`
//! a su representación visible, y serialización canónica para copiar al portapapeles.

use std::fmt;

use serde::Serialize;

use crate::models::{IoField, WorkflowNode};

/// Vista de un nodo. `details` sólo existe cuando el nodo está expandido.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub id: String,
    pub title: String,
    pub expanded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<NodeDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDetails {
    pub prompt: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

pub fn present(node: &WorkflowNode, expanded: bool) -> NodeView {
    let details = expanded.then(|| NodeDetails {
        prompt: node.prompt.clone(),
        inputs: node.inputs.iter().map(bullet).collect(),
        outputs: node.outputs.iter().map(bullet).collect(),
    });

    NodeView {
        id: node.id.clone(),
        title: node.title.clone(),
        expanded,
        details,
    }
}

/// `name (type) - description`
pub fn bullet(field: &IoField) -> String {
    format!("{} ({}) - {}", field.name, field.kind, field.description)
}

/// JSON indentado con orden de claves fijo: dos copias del mismo nodo son idénticas byte a byte.
pub fn serialize(node: &WorkflowNode) -> serde_json::Result<String> {
    serde_json::to_string_pretty(node)
}

impl fmt::Display for NodeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.expanded { "[-]" } else { "[+]" };
        write!(f, "{} {}", marker, self.title)?;

        if let Some(details) = &self.details {
            write!(f, "\n    Prompt: {}", details.prompt)?;
            for (label, items) in [("Inputs", &details.inputs), ("Outputs", &details.outputs)] {
                write!(f, "\n    {label}:")?;
                for item in items {
                    write!(f, "\n      • {item}")?;
                }
            }
        }
        Ok(())
    }
}
