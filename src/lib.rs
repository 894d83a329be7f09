//! Generador de workflows DSL para agentes GUI: gestión de las capturas a subir,
//! parser tolerante del DSL devuelto por el modelo y presentación navegable de los nodos.

pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod fileset;
pub mod generation;
pub mod models;
pub mod preferences;
pub mod presenter;
pub mod session;
pub mod workflow;
