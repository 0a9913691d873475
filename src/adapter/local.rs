//! Directory-backed cloud: one JSON document per live resource under
//! `<root>/<kind>/<live_id>.json`. Lets the CLI run the full pipeline
//! without provider credentials.

use super::{is_retained, Provisioned, ProvisioningAdapter};
use crate::core::error::AdapterError;
use crate::core::types::{Environment, ResourceKind, Value};
use crate::resources;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Document {
    kind: ResourceKind,
    logical_id: String,
    live_id: String,
    properties: BTreeMap<String, Value>,
    outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LocalCloud {
    root: PathBuf,
    env: Environment,
}

fn file_safe(live_id: &str) -> String {
    live_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' { c } else { '_' })
        .collect()
}

fn io_error(path: &Path, e: std::io::Error) -> AdapterError {
    AdapterError::transient(format!("{}: {}", path.display(), e))
}

impl LocalCloud {
    /// Cloud rooted at `<state_dir>/.cloud`.
    pub fn new(state_dir: &Path, env: Environment) -> Self {
        Self {
            root: state_dir.join(".cloud"),
            env,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, kind: ResourceKind, live_id: &str) -> PathBuf {
        self.root
            .join(kind.to_string())
            .join(format!("{}.json", file_safe(live_id)))
    }

    fn read(&self, kind: ResourceKind, live_id: &str) -> Result<Option<Document>, AdapterError> {
        let path = self.document_path(kind, live_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| AdapterError::permanent(format!("{}: {}", path.display(), e)))
    }

    fn write(&self, doc: &Document) -> Result<(), AdapterError> {
        let path = self.document_path(doc.kind, &doc.live_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| AdapterError::permanent(format!("encode {}: {}", doc.live_id, e)))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))
    }
}

impl ProvisioningAdapter for LocalCloud {
    fn name(&self) -> &'static str {
        "local"
    }

    fn create(
        &self,
        kind: ResourceKind,
        logical_id: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<Provisioned, AdapterError> {
        let (live_id, outputs) = resources::live_identity(kind, logical_id, properties, &self.env);
        if let Some(existing) = self.read(kind, &live_id)? {
            if existing.logical_id != logical_id {
                return Err(AdapterError::permanent(format!(
                    "{} '{}' already exists (owned by '{}')",
                    kind, live_id, existing.logical_id
                )));
            }
            log::debug!("local: adopting existing {} '{}'", kind, live_id);
        }
        self.write(&Document {
            kind,
            logical_id: logical_id.to_string(),
            live_id: live_id.clone(),
            properties: properties.clone(),
            outputs: outputs.clone(),
        })?;
        log::debug!("local: created {} '{}'", kind, live_id);
        Ok(Provisioned { live_id, outputs })
    }

    fn update(
        &self,
        kind: ResourceKind,
        live_id: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, String>, AdapterError> {
        let mut doc = self
            .read(kind, live_id)?
            .ok_or_else(|| AdapterError::permanent(format!("{} '{}' not found", kind, live_id)))?;
        let (_, outputs) = resources::live_identity(kind, &doc.logical_id, properties, &self.env);
        doc.properties = properties.clone();
        doc.outputs = outputs.clone();
        self.write(&doc)?;
        Ok(outputs)
    }

    fn delete(&self, kind: ResourceKind, live_id: &str) -> Result<(), AdapterError> {
        let path = self.document_path(kind, live_id);
        let Some(doc) = self.read(kind, live_id)? else {
            log::debug!("local: {} '{}' already gone", kind, live_id);
            return Ok(());
        };
        if is_retained(&doc.properties) {
            let orphan_dir = self.root.join("orphaned").join(kind.to_string());
            std::fs::create_dir_all(&orphan_dir).map_err(|e| io_error(&orphan_dir, e))?;
            let target = orphan_dir.join(format!("{}.json", file_safe(live_id)));
            std::fs::rename(&path, &target).map_err(|e| io_error(&target, e))?;
            log::info!("local: retaining {} '{}' in {}", kind, live_id, target.display());
            return Ok(());
        }
        std::fs::remove_file(&path).map_err(|e| io_error(&path, e))
    }

    fn exists(&self, kind: ResourceKind, live_id: &str) -> Result<bool, AdapterError> {
        Ok(self.document_path(kind, live_id).exists())
    }
}
