//! Gestor del conjunto de imágenes candidatas a subir.
//!
//! Cada candidato se evalúa de forma independiente y en orden. El límite de número
//! se aplica de forma acumulada: entran los primeros que caben y todo lo que
//! sobra se rechaza con `TooMany`, sea cual sea su validez individual.

use mime_guess::MimeGuess;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::RejectReason;

/// Fichero tal y como llega del navegador (drag & drop o selector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
    /// Tamaño real visto en la entrada; coincide con `data.len()` salvo en los descartados.
    pub size: u64,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, content_type: Option<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            name: name.into(),
            content_type,
            data,
            size,
        }
    }

    /// Fichero cuyo contenido se dejó de leer al pasar del límite: sólo conserva el tamaño
    /// visto, suficiente para que la admisión lo rechace con `TooLarge`.
    pub fn oversized(name: impl Into<String>, content_type: Option<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            content_type,
            data: Vec::new(),
            size,
        }
    }
}

/// Un fichero con sus atributos derivados (tamaño, MIME, nombre visible).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCandidate {
    blob: FileBlob,
    mime_type: String,
}

impl UploadCandidate {
    /// Si el navegador no envía tipo MIME (o envía el genérico), se deduce de la extensión.
    pub fn new(blob: FileBlob) -> Self {
        let declared = blob
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
            .map(str::to_string);
        let mime_type = declared.unwrap_or_else(|| {
            MimeGuess::from_path(&blob.name)
                .first()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string())
        });
        Self { blob, mime_type }
    }

    pub fn name(&self) -> &str {
        &self.blob.name
    }

    pub fn size(&self) -> u64 {
        self.blob.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn data(&self) -> &[u8] {
        &self.blob.data
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            name: self.name().to_string(),
            size_bytes: self.size(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Vista serializable de un candidato (sin los bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub candidate: UploadCandidate,
    pub reason: RejectReason,
}

/// Resultado de `add_batch`. Siempre `accepted.len() + rejected.len() == entrada`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub accepted: Vec<FileSummary>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone)]
pub struct FileSet {
    files: Vec<UploadCandidate>,
    max_count: usize,
    max_bytes: u64,
}

impl FileSet {
    pub fn new(max_count: usize, max_bytes: u64) -> Self {
        Self {
            files: Vec::new(),
            max_count,
            max_bytes,
        }
    }

    pub fn add_batch(&mut self, blobs: Vec<FileBlob>) -> BatchResult {
        let mut result = BatchResult::default();

        for blob in blobs {
            let candidate = UploadCandidate::new(blob);
            match self.admission(&candidate) {
                Ok(()) => {
                    debug!("Imagen admitida: {} ({} bytes)", candidate.name(), candidate.size());
                    result.accepted.push(candidate.summary());
                    self.files.push(candidate);
                }
                Err(reason) => {
                    warn!("Imagen rechazada: {} ({:?})", candidate.name(), reason);
                    result.rejected.push(Rejection { candidate, reason });
                }
            }
        }

        result
    }

    fn admission(&self, candidate: &UploadCandidate) -> Result<(), RejectReason> {
        if self.files.len() >= self.max_count {
            return Err(RejectReason::TooMany);
        }
        if !candidate.is_image() {
            return Err(RejectReason::NotAnImage);
        }
        if candidate.size() > self.max_bytes {
            return Err(RejectReason::TooLarge);
        }
        Ok(())
    }

    /// Índices fuera de rango son un no-op: la UI puede repetir clics.
    pub fn remove_at(&mut self, index: usize) -> Option<UploadCandidate> {
        if index < self.files.len() {
            Some(self.files.remove(index))
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.files.clear();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn files(&self) -> &[UploadCandidate] {
        &self.files
    }

    pub fn summaries(&self) -> Vec<FileSummary> {
        self.files.iter().map(UploadCandidate::summary).collect()
    }
}
