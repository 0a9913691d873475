//! TR-013: State store: per-stack snapshots, apply leases, history.
//!
//! On disk, each stack owns a directory under the state dir:
//! `state.yaml` (atomic temp+rename writes), `events.jsonl` and, while an
//! apply is running, `apply.lock`.

use super::error::StateError;
use super::types::{ProvenanceEvent, RunStatus, StateRecord, TimestampedEvent};
use crate::tripwire::eventlog;
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const STATE_SCHEMA: &str = "1.0";

pub fn state_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.yaml")
}

pub fn lease_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("apply.lock")
}

/// Stack names become directory names: `[A-Za-z0-9_-]+`.
pub fn check_stack_name(stack: &str) -> Result<(), StateError> {
    let valid = !stack.is_empty()
        && stack
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidStackName(stack.to_string()))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Load a stack's record. `None` when the stack was never applied.
pub fn load_record(state_dir: &Path, stack: &str) -> Result<Option<StateRecord>, StateError> {
    check_stack_name(stack)?;
    let path = state_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(io_error(&path))?;
    let record: StateRecord = serde_yaml_ng::from_str(&content).map_err(|e| StateError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;
    Ok(Some(record))
}

/// Save a record atomically (write to temp, then rename).
pub fn save_record(state_dir: &Path, record: &StateRecord) -> Result<(), StateError> {
    check_stack_name(&record.stack)?;
    let path = state_file_path(state_dir, &record.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let yaml = serde_yaml_ng::to_string(record).map_err(|e| StateError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml).map_err(io_error(&tmp_path))?;
    std::fs::rename(&tmp_path, &path).map_err(io_error(&path))?;
    Ok(())
}

/// Empty record for a stack that has never been applied.
pub fn new_record(stack: &str) -> StateRecord {
    StateRecord {
        schema: STATE_SCHEMA.to_string(),
        stack: stack.to_string(),
        generated_at: eventlog::now_iso8601(),
        generator: format!("terrace {}", env!("CARGO_PKG_VERSION")),
        status: RunStatus::Succeeded,
        last_applied_op_index: None,
        plan_fingerprint: None,
        nodes: IndexMap::new(),
    }
}

/// Exclusive right to apply one stack. Released on drop.
pub struct StateLease {
    stack: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl StateLease {
    fn new(stack: &str, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stack: stack.to_string(),
            release: Some(Box::new(release)),
        }
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }
}

impl fmt::Debug for StateLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateLease").field("stack", &self.stack).finish()
    }
}

impl Drop for StateLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Persistence for state records and provenance history.
pub trait StateStore: Send + Sync {
    fn load(&self, stack: &str) -> Result<Option<StateRecord>, StateError>;

    fn save(&self, record: &StateRecord) -> Result<(), StateError>;

    /// Take the stack's apply lease. Fails with `Locked` while another
    /// lease for the same stack is alive.
    fn lock(&self, stack: &str) -> Result<StateLease, StateError>;

    fn record_event(&self, stack: &str, event: ProvenanceEvent) -> Result<(), StateError>;

    fn history(&self, stack: &str) -> Result<Vec<TimestampedEvent>, StateError>;

    /// Names of stacks with a saved record, sorted.
    fn stacks(&self) -> Result<Vec<String>, StateError>;
}

// ============================================================================
// File-backed store
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remove a lease left behind by a crashed run. Returns whether one
    /// was present.
    pub fn force_unlock(&self, stack: &str) -> Result<bool, StateError> {
        check_stack_name(stack)?;
        let path = lease_file_path(&self.dir, stack);
        if !path.exists() {
            return Ok(false);
        }
        let holder = std::fs::read_to_string(&path).unwrap_or_default();
        std::fs::remove_file(&path).map_err(io_error(&path))?;
        log::warn!("removed lease of stack '{}' ({})", stack, holder.trim());
        Ok(true)
    }
}

impl StateStore for FileStateStore {
    fn load(&self, stack: &str) -> Result<Option<StateRecord>, StateError> {
        load_record(&self.dir, stack)
    }

    fn save(&self, record: &StateRecord) -> Result<(), StateError> {
        save_record(&self.dir, record)
    }

    fn lock(&self, stack: &str) -> Result<StateLease, StateError> {
        check_stack_name(stack)?;
        let path = lease_file_path(&self.dir, stack);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown holder".to_string());
                return Err(StateError::Locked {
                    stack: stack.to_string(),
                    holder,
                });
            }
            Err(e) => return Err(io_error(&path)(e)),
        };
        if let Err(e) = writeln!(
            file,
            "pid {} since {}",
            std::process::id(),
            eventlog::now_iso8601()
        ) {
            drop(file);
            if let Err(rm) = std::fs::remove_file(&path) {
                log::warn!("cannot remove lease {}: {}", path.display(), rm);
            }
            return Err(io_error(&path)(e));
        }

        log::debug!("acquired lease {}", path.display());
        Ok(StateLease::new(stack, move || {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("cannot release lease {}: {}", path.display(), e);
            }
        }))
    }

    fn record_event(&self, stack: &str, event: ProvenanceEvent) -> Result<(), StateError> {
        eventlog::append_event(&self.dir, stack, event)
    }

    fn history(&self, stack: &str) -> Result<Vec<TimestampedEvent>, StateError> {
        eventlog::read_events(&self.dir, stack)
    }

    fn stacks(&self) -> Result<Vec<String>, StateError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut stacks = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
            let entry = entry.map_err(io_error(&self.dir))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.path().join("state.yaml").is_file() {
                stacks.push(name);
            }
        }
        stacks.sort();
        Ok(stacks)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    records: BTreeMap<String, StateRecord>,
    events: BTreeMap<String, Vec<TimestampedEvent>>,
    leases: BTreeSet<String>,
    saves: usize,
}

/// Process-local store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<MemoryInner>>,
}

fn lock_inner(inner: &Mutex<MemoryInner>) -> MutexGuard<'_, MemoryInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        lock_inner(&self.inner).saves
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, stack: &str) -> Result<Option<StateRecord>, StateError> {
        Ok(lock_inner(&self.inner).records.get(stack).cloned())
    }

    fn save(&self, record: &StateRecord) -> Result<(), StateError> {
        let mut inner = lock_inner(&self.inner);
        inner.records.insert(record.stack.clone(), record.clone());
        inner.saves += 1;
        Ok(())
    }

    fn lock(&self, stack: &str) -> Result<StateLease, StateError> {
        if !lock_inner(&self.inner).leases.insert(stack.to_string()) {
            return Err(StateError::Locked {
                stack: stack.to_string(),
                holder: "this process".to_string(),
            });
        }
        let inner = Arc::clone(&self.inner);
        let owned = stack.to_string();
        Ok(StateLease::new(stack, move || {
            lock_inner(&inner).leases.remove(&owned);
        }))
    }

    fn record_event(&self, stack: &str, event: ProvenanceEvent) -> Result<(), StateError> {
        lock_inner(&self.inner)
            .events
            .entry(stack.to_string())
            .or_default()
            .push(TimestampedEvent {
                ts: eventlog::now_iso8601(),
                event,
            });
        Ok(())
    }

    fn history(&self, stack: &str) -> Result<Vec<TimestampedEvent>, StateError> {
        Ok(lock_inner(&self.inner)
            .events
            .get(stack)
            .cloned()
            .unwrap_or_default())
    }

    fn stacks(&self) -> Result<Vec<String>, StateError> {
        Ok(lock_inner(&self.inner).records.keys().cloned().collect())
    }
}
