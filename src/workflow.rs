//! Parser tolerante del DSL de workflows.
//!
//! El productor es un modelo generativo, así que la salida no está garantizada.
//! Todo pasa por un único paso de normalización (`resolve_nodes` + `normalize_node`)
//! que produce la forma canónica; sólo falla si no hay ninguna secuencia de nodos
//! reconocible. Los campos mal formados dentro de un nodo se degradan a su valor vacío.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::MalformedWorkflow;
use crate::models::{IoField, Workflow, WorkflowNode};

/// Profundidad máxima de envoltorios (`dsl` en texto dentro de objetos, etc.).
const MAX_NESTING: usize = 4;

/// Parsea texto JSON.
pub fn parse_text(text: &str) -> Result<Workflow, MalformedWorkflow> {
    let value: Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| MalformedWorkflow(format!("el documento no es JSON válido: {e}")))?;
    parse_value(&value)
}

/// Parsea un valor ya decodificado. Acepta un array de nodos, `{workflow: [...]}`,
/// `{nodes: [...]}`, `{dsl: ...}` (texto o valor) o una cadena con cualquiera de ellos.
pub fn parse_value(value: &Value) -> Result<Workflow, MalformedWorkflow> {
    let items = resolve_nodes(value, 0)?;
    Ok(normalize(&items))
}

/// Quita el bloque Markdown (```json ... ```) con el que los modelos suelen envolver el JSON.
fn strip_code_fence(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn resolve_nodes(value: &Value, depth: usize) -> Result<Vec<Value>, MalformedWorkflow> {
    if depth > MAX_NESTING {
        return Err(MalformedWorkflow(
            "demasiados niveles de envoltorio en el documento".to_string(),
        ));
    }

    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(text) => {
            let inner: Value = serde_json::from_str(strip_code_fence(text)).map_err(|e| {
                MalformedWorkflow(format!("el texto del DSL no es JSON válido: {e}"))
            })?;
            resolve_nodes(&inner, depth + 1)
        }
        Value::Object(obj) => {
            for key in ["workflow", "nodes"] {
                if let Some(Value::Array(items)) = obj.get(key) {
                    return Ok(items.clone());
                }
            }
            if let Some(dsl) = obj.get("dsl") {
                return resolve_nodes(dsl, depth + 1);
            }
            // `workflow` como texto JSON también aparece en algunas respuestas.
            if let Some(inner) = obj.get("workflow").filter(|v| v.is_string()) {
                return resolve_nodes(inner, depth + 1);
            }
            Err(MalformedWorkflow(
                "el objeto no contiene una secuencia `workflow`".to_string(),
            ))
        }
        other => Err(MalformedWorkflow(format!(
            "se esperaba un array u objeto, no {}",
            json_kind(other)
        ))),
    }
}

fn normalize(items: &[Value]) -> Workflow {
    let mut seen = HashSet::with_capacity(items.len());
    let nodes = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let mut node = normalize_node(index, item);
            node.id = unique_id(node.id, index, &mut seen);
            node
        })
        .collect();
    Workflow { nodes }
}

fn normalize_node(index: usize, item: &Value) -> WorkflowNode {
    let Some(obj) = item.as_object() else {
        warn!(
            "Nodo {} no es un objeto ({}); se muestra degradado",
            index,
            json_kind(item)
        );
        return WorkflowNode {
            id: synthetic_id(index),
            ..WorkflowNode::default()
        };
    };

    let id = text_field(obj, "id");
    WorkflowNode {
        id: if id.trim().is_empty() {
            synthetic_id(index)
        } else {
            id
        },
        title: text_field(obj, "title"),
        prompt: text_field(obj, "prompt"),
        inputs: io_fields(obj, "inputs", index),
        outputs: io_fields(obj, "outputs", index),
    }
}

fn synthetic_id(index: usize) -> String {
    format!("node-{index}")
}

/// Garantiza ids únicos dentro del workflow sin tocar el primero que aparece.
fn unique_id(id: String, index: usize, seen: &mut HashSet<String>) -> String {
    let mut candidate = id;
    while seen.contains(&candidate) {
        debug!("Id duplicado '{}' en la posición {}", candidate, index);
        candidate = format!("{candidate}-{index}");
    }
    seen.insert(candidate.clone());
    candidate
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => {
            debug!("Campo '{}' con tipo {} degradado a vacío", key, json_kind(other));
            String::new()
        }
    }
}

fn io_fields(obj: &Map<String, Value>, key: &str, node_index: usize) -> Vec<IoField> {
    let items = match obj.get(key) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => return Vec::new(),
        Some(other) => {
            debug!(
                "'{}' del nodo {} es {} y no un array; se trata como vacío",
                key,
                node_index,
                json_kind(other)
            );
            return Vec::new();
        }
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(field) => Some(IoField {
                name: text_field(field, "name"),
                kind: text_field(field, "type"),
                description: if field.contains_key("description") {
                    text_field(field, "description")
                } else {
                    text_field(field, "desc")
                },
            }),
            Value::String(name) => Some(IoField {
                name: name.clone(),
                ..IoField::default()
            }),
            other => {
                debug!("Entrada de '{}' descartada: {}", key, json_kind(other));
                None
            }
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "booleano",
        Value::Number(_) => "número",
        Value::String(_) => "cadena",
        Value::Array(_) => "array",
        Value::Object(_) => "objeto",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrapped_workflow_keeps_exact_values() {
        let wf = parse_text(
            r#"{"workflow":[{"id":"n1","title":"T","prompt":"P","inputs":[],"outputs":[]}]}"#,
        )
        .unwrap();
        assert_eq!(
            wf.nodes,
            vec![WorkflowNode {
                id: "n1".into(),
                title: "T".into(),
                prompt: "P".into(),
                inputs: vec![],
                outputs: vec![],
            }]
        );
    }

    #[test]
    fn bare_array_with_missing_fields_degrades() {
        let wf = parse_text(r#"[{"title":"T"}]"#).unwrap();
        assert_eq!(wf.len(), 1);
        let node = &wf.nodes[0];
        assert_eq!(node.id, "node-0");
        assert_eq!(node.title, "T");
        assert_eq!(node.prompt, "");
        assert!(node.inputs.is_empty());
        assert!(node.outputs.is_empty());
    }

    #[test]
    fn non_json_is_malformed() {
        let err = parse_text("not json").unwrap_err();
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn unrecognised_shapes_are_malformed() {
        assert!(parse_value(&json!({"steps": []})).is_err());
        assert!(parse_value(&json!(42)).is_err());
        assert!(parse_value(&json!(null)).is_err());
        assert!(parse_value(&json!({"workflow": 3})).is_err());
    }

    #[test]
    fn dsl_envelope_as_text_or_value() {
        let as_text = json!({"dsl": "{\"workflow\":[{\"id\":\"a\",\"title\":\"A\"}]}"});
        let as_value = json!({"dsl": {"workflow": [{"id": "a", "title": "A"}]}});
        assert_eq!(parse_value(&as_text).unwrap(), parse_value(&as_value).unwrap());
        assert_eq!(parse_value(&as_text).unwrap().nodes[0].title, "A");
    }

    #[test]
    fn fenced_model_output_is_salvaged() {
        let fenced = json!({"dsl": "```json\n{\"workflow\":[{\"id\":\"n1\",\"title\":\"T\"}]}\n```"});
        let wf = parse_value(&fenced).unwrap();
        assert_eq!(wf.nodes[0].id, "n1");
        assert_eq!(wf.nodes[0].title, "T");

        let bare_fence = "```\n[{\"id\":\"a\"}]\n```";
        assert_eq!(parse_text(bare_fence).unwrap().nodes[0].id, "a");
        assert!(parse_text("```json\nnot json\n```").is_err());
    }

    #[test]
    fn template_items_use_nodes_key() {
        let wf = parse_value(&json!({"id": "t1", "title": "Login", "nodes": [{"id": "x"}]})).unwrap();
        assert_eq!(wf.nodes[0].id, "x");
    }

    #[test]
    fn double_encoded_string_is_unwrapped() {
        let inner = r#"[{"id":"n1","title":"T"}]"#;
        let outer = serde_json::to_string(inner).unwrap();
        assert_eq!(parse_text(&outer).unwrap().nodes[0].id, "n1");
    }

    #[test]
    fn endless_string_nesting_is_bounded() {
        let mut value = json!([]);
        for _ in 0..=MAX_NESTING + 1 {
            value = Value::String(value.to_string());
        }
        assert!(parse_value(&value).is_err());
    }

    #[test]
    fn bad_field_types_degrade_without_failing() {
        let wf = parse_value(&json!([
            {
                "id": 7,
                "title": {"nested": true},
                "prompt": ["x"],
                "inputs": "url",
                "outputs": [
                    {"name": "page", "type": "html", "desc": "contenido"},
                    "screenshot",
                    12
                ]
            }
        ]))
        .unwrap();
        let node = &wf.nodes[0];
        assert_eq!(node.id, "7");
        assert_eq!(node.title, "");
        assert_eq!(node.prompt, "");
        assert!(node.inputs.is_empty());
        assert_eq!(
            node.outputs,
            vec![
                IoField {
                    name: "page".into(),
                    kind: "html".into(),
                    description: "contenido".into(),
                },
                IoField {
                    name: "screenshot".into(),
                    ..IoField::default()
                },
            ]
        );
    }

    #[test]
    fn non_object_nodes_keep_their_position() {
        let wf = parse_value(&json!([{"id": "a"}, "oops", {"id": "c"}])).unwrap();
        let ids: Vec<_> = wf.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "node-1", "c"]);
    }

    #[test]
    fn duplicate_and_colliding_ids_are_made_unique() {
        let wf = parse_value(&json!([
            {"id": "step"},
            {"id": "step"},
            {"title": "sin id"},
            {"id": "node-2"}
        ]))
        .unwrap();
        let ids: Vec<_> = wf.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["step", "step-1", "node-2", "node-2-3"]);
    }

    #[test]
    fn synthetic_ids_are_stable_across_parses() {
        let text = r#"[{"title":"a"},{"title":"b"}]"#;
        assert_eq!(parse_text(text).unwrap(), parse_text(text).unwrap());
    }
}
