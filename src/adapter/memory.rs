//! In-memory simulated cloud with scriptable failures.

use super::{is_retained, Provisioned, ProvisioningAdapter};
use crate::core::error::AdapterError;
use crate::core::types::{Environment, ResourceKind, Value};
use crate::resources;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A resource as the simulated provider sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveResource {
    pub kind: ResourceKind,
    pub logical_id: String,
    pub properties: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    live: BTreeMap<(ResourceKind, String), LiveResource>,
    orphaned: Vec<LiveResource>,
    /// Queued failures keyed by logical id (create) or live id (update,
    /// delete); each call pops one.
    failures: BTreeMap<String, VecDeque<AdapterError>>,
    calls: Vec<String>,
}

/// Simulated provider. Live ids and outputs are derived deterministically
/// from kind, logical id, name and environment.
#[derive(Debug, Default)]
pub struct MemoryCloud {
    env: Environment,
    inner: Mutex<Inner>,
}

impl MemoryCloud {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `times` calls touching `id` fail with `error`.
    pub fn fail_next(&self, id: &str, error: AdapterError, times: usize) {
        let mut inner = self.lock();
        let queue = inner.failures.entry(id.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Drop a live resource behind the executor's back.
    pub fn remove(&self, kind: ResourceKind, live_id: &str) -> Option<LiveResource> {
        self.lock().live.remove(&(kind, live_id.to_string()))
    }

    pub fn get(&self, kind: ResourceKind, live_id: &str) -> Option<LiveResource> {
        self.lock().live.get(&(kind, live_id.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().live.is_empty()
    }

    /// Resources released from management by a retain-on-delete policy.
    pub fn orphaned(&self) -> Vec<LiveResource> {
        self.lock().orphaned.clone()
    }

    /// Every call so far as `verb:id`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, verb: &str, id: &str) -> usize {
        let needle = format!("{}:{}", verb, id);
        self.lock().calls.iter().filter(|c| **c == needle).count()
    }
}

impl Inner {
    fn record(&mut self, verb: &str, id: &str) -> Result<(), AdapterError> {
        self.calls.push(format!("{}:{}", verb, id));
        match self.failures.get_mut(id).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ProvisioningAdapter for MemoryCloud {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create(
        &self,
        kind: ResourceKind,
        logical_id: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<Provisioned, AdapterError> {
        let mut inner = self.lock();
        inner.record("create", logical_id)?;
        let (live_id, outputs) = resources::live_identity(kind, logical_id, properties, &self.env);
        if let Some(existing) = inner.live.get(&(kind, live_id.clone())) {
            if existing.logical_id != logical_id {
                return Err(AdapterError::permanent(format!(
                    "{} '{}' already exists (owned by '{}')",
                    kind, live_id, existing.logical_id
                )));
            }
            log::debug!("memory: adopting existing {} '{}'", kind, live_id);
        }
        inner.live.insert(
            (kind, live_id.clone()),
            LiveResource {
                kind,
                logical_id: logical_id.to_string(),
                properties: properties.clone(),
                outputs: outputs.clone(),
            },
        );
        Ok(Provisioned { live_id, outputs })
    }

    fn update(
        &self,
        kind: ResourceKind,
        live_id: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, String>, AdapterError> {
        let mut inner = self.lock();
        inner.record("update", live_id)?;
        let env = &self.env;
        let resource = inner
            .live
            .get_mut(&(kind, live_id.to_string()))
            .ok_or_else(|| AdapterError::permanent(format!("{} '{}' not found", kind, live_id)))?;
        let (_, outputs) = resources::live_identity(kind, &resource.logical_id, properties, env);
        resource.properties = properties.clone();
        resource.outputs = outputs.clone();
        Ok(outputs)
    }

    fn delete(&self, kind: ResourceKind, live_id: &str) -> Result<(), AdapterError> {
        let mut inner = self.lock();
        inner.record("delete", live_id)?;
        match inner.live.remove(&(kind, live_id.to_string())) {
            Some(resource) if is_retained(&resource.properties) => {
                log::info!("memory: retaining {} '{}'", kind, live_id);
                inner.orphaned.push(resource);
            }
            Some(_) => {}
            None => log::debug!("memory: {} '{}' already gone", kind, live_id),
        }
        Ok(())
    }

    fn exists(&self, kind: ResourceKind, live_id: &str) -> Result<bool, AdapterError> {
        Ok(self.lock().live.contains_key(&(kind, live_id.to_string())))
    }
}
