//! TR-015: Append-only JSONL provenance event log, one file per stack.

use crate::core::error::StateError;
use crate::core::state::check_stack_name;
use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// RFC 3339 UTC timestamp with second precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Run id derived from the current time.
pub fn generate_run_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Append a timestamped event to the stack's log.
pub fn append_event(state_dir: &Path, stack: &str, event: ProvenanceEvent) -> Result<(), StateError> {
    check_stack_name(stack)?;
    let path = event_log_path(state_dir, stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| StateError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_error(&path))?;
    writeln!(file, "{}", json).map_err(io_error(&path))?;
    Ok(())
}

/// Read every event for a stack, oldest first. Missing log = no events;
/// unparseable lines are skipped with a warning.
pub fn read_events(state_dir: &Path, stack: &str) -> Result<Vec<TimestampedEvent>, StateError> {
    check_stack_name(stack)?;
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(io_error(&path))?;
    let mut events = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TimestampedEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => log::warn!("{}:{}: skipping event: {}", path.display(), lineno + 1, e),
        }
    }
    Ok(events)
}
