//! TR-012: Executor: applies a change plan through a provisioning adapter.
//!
//! lease → load state → (resume check) → for each op: resolve references →
//! adapter call with retry → record node → save → events
//!
//! Ops run strictly in plan order. The first failure halts the run and is
//! persisted as `PartiallyFailed`; applying the same plan again re-validates
//! the already-applied prefix and skips it.

use super::cancel::CancelSignal;
use super::error::{AdapterError, ExecError};
use super::planner;
use super::retry::{self, Attempted};
use super::state::{self, StateStore};
use super::types::*;
use crate::adapter::ProvisioningAdapter;
use crate::tripwire::eventlog;
use std::collections::BTreeMap;
use std::time::Instant;

/// Collaborators for one apply run.
pub struct ApplyConfig<'a> {
    pub adapter: &'a dyn ProvisioningAdapter,
    pub store: &'a dyn StateStore,
    pub policy: &'a Policy,
    pub cancel: &'a CancelSignal,
}

/// What a successful adapter call changed.
enum OpOutcome {
    Provisioned {
        live_id: String,
        outputs: BTreeMap<String, String>,
    },
    Removed,
}

/// Shared context for emitting provenance events.
struct EventCtx<'a> {
    store: &'a dyn StateStore,
    stack: &'a str,
    tripwire: bool,
}

impl EventCtx<'_> {
    fn emit(&self, event: ProvenanceEvent) {
        if !self.tripwire {
            return;
        }
        if let Err(e) = self.store.record_event(self.stack, event) {
            log::warn!("{}: cannot record event: {}", self.stack, e);
        }
    }
}

/// Apply `plan`. Op failures are reported in the result; only state store
/// failures (and a plan for the wrong stack) are errors.
pub fn apply(cfg: &ApplyConfig, plan: &ChangePlan) -> Result<ExecutionResult, ExecError> {
    let start = Instant::now();
    let stack = plan.stack.as_str();
    let _lease = cfg.store.lock(stack)?;

    let mut record = match cfg.store.load(stack)? {
        Some(r) if r.stack != stack => {
            return Err(ExecError::StackMismatch {
                plan: stack.to_string(),
                recorded: r.stack,
            })
        }
        Some(r) => r,
        None => state::new_record(stack),
    };

    let resuming = record.plan_fingerprint.as_deref() == Some(plan.fingerprint.as_str());
    if let Some(expected) = &plan.prior_digest {
        if !resuming && *expected != planner::state_digest(&record.nodes)? {
            log::warn!("stack '{}': state changed since planning, refusing stale plan", stack);
            return Err(ExecError::StalePlan(stack.to_string()));
        }
    }

    let resume_limit = if resuming {
        record.last_applied_op_index
    } else {
        record.last_applied_op_index = None;
        None
    };
    record.plan_fingerprint = Some(plan.fingerprint.clone());
    record.status = RunStatus::InProgress;
    record.generated_at = eventlog::now_iso8601();
    cfg.store.save(&record)?;

    let events = EventCtx {
        store: cfg.store,
        stack,
        tripwire: cfg.policy.tripwire,
    };
    let run_id = eventlog::generate_run_id();
    events.emit(ProvenanceEvent::ApplyStarted {
        stack: stack.to_string(),
        run_id: run_id.clone(),
        plan_fingerprint: plan.fingerprint.clone(),
        ops: plan.ops.len(),
    });
    log::info!(
        "applying stack '{}' ({} ops, run {}) via {}",
        stack,
        plan.ops.len(),
        run_id,
        cfg.adapter.name()
    );

    let mut ops_applied = 0u32;
    let mut ops_skipped = 0u32;
    let mut skipping = resume_limit.is_some();
    let mut failure: Option<(usize, String)> = None;

    for (index, op) in plan.ops.iter().enumerate() {
        if skipping {
            let in_prefix = resume_limit.is_some_and(|last| index <= last);
            if in_prefix && still_applied(cfg.adapter, &record, op) {
                log::info!("[{}] {} {}: already applied, skipping", index, op.action, op.id);
                events.emit(ProvenanceEvent::OpSkipped {
                    stack: stack.to_string(),
                    index,
                    resource: op.id.clone(),
                });
                ops_skipped += 1;
                continue;
            }
            if in_prefix {
                log::warn!(
                    "[{}] {} {}: recorded result no longer matches, re-applying",
                    index,
                    op.action,
                    op.id
                );
            }
            skipping = false;
        }

        if cfg.cancel.is_cancelled() {
            log::warn!("stack '{}' {} before op {}", stack, cfg.cancel.reason(), index);
            failure = Some((index, cfg.cancel.reason().to_string()));
            break;
        }

        events.emit(ProvenanceEvent::OpStarted {
            stack: stack.to_string(),
            index,
            resource: op.id.clone(),
            action: op.action.to_string(),
        });
        let op_start = Instant::now();
        let Attempted { result, attempts } = apply_op(cfg, &record, op);

        match result {
            Ok(outcome) => {
                let live_id = record_outcome(&mut record, op, outcome);
                record.last_applied_op_index = Some(index);
                record.generated_at = eventlog::now_iso8601();
                cfg.store.save(&record)?;
                ops_applied += 1;
                log::info!("[{}] {} {} ({})", index, op.action, op.id, live_id);
                events.emit(ProvenanceEvent::OpSucceeded {
                    stack: stack.to_string(),
                    index,
                    resource: op.id.clone(),
                    live_id,
                    attempts,
                    duration_seconds: op_start.elapsed().as_secs_f64(),
                });
            }
            Err(e) => {
                log::error!(
                    "[{}] {} {} failed after {} attempt(s): {}",
                    index,
                    op.action,
                    op.id,
                    attempts,
                    e
                );
                events.emit(ProvenanceEvent::OpFailed {
                    stack: stack.to_string(),
                    index,
                    resource: op.id.clone(),
                    attempts,
                    error: e.to_string(),
                });
                failure = Some((index, format!("{}: {}", op.id, e)));
                break;
            }
        }
    }

    let ops_failed = u32::from(failure.is_some());
    record.status = match failure {
        Some((op_index, error)) => RunStatus::PartiallyFailed { op_index, error },
        None => RunStatus::Succeeded,
    };
    record.generated_at = eventlog::now_iso8601();
    cfg.store.save(&record)?;

    let total_duration = start.elapsed();
    events.emit(ProvenanceEvent::ApplyCompleted {
        stack: stack.to_string(),
        run_id,
        ops_applied,
        ops_skipped,
        ops_failed,
        total_seconds: total_duration.as_secs_f64(),
    });

    Ok(ExecutionResult {
        stack: stack.to_string(),
        status: record.status,
        ops_applied,
        ops_skipped,
        total_duration,
    })
}

/// Whether an op from the resumed prefix still holds: the node record
/// matches what the op asked for and the live resource is still there
/// (for deletes: the node is gone from the record).
fn still_applied(adapter: &dyn ProvisioningAdapter, record: &StateRecord, op: &ChangeOp) -> bool {
    let Some(node) = record.nodes.get(&op.id) else {
        return op.action == ChangeAction::Delete;
    };
    if op.action == ChangeAction::Delete
        || node.kind != op.kind
        || node.properties != op.properties
        || node.policy != op.policy
    {
        return false;
    }
    if let Some(ref expected) = op.live_id {
        if *expected != node.live_id {
            return false;
        }
    }
    match adapter.exists(node.kind, &node.live_id) {
        Ok(exists) => exists,
        Err(e) => {
            log::warn!("cannot confirm {} '{}': {}", node.kind, node.live_id, e);
            false
        }
    }
}

fn apply_op(cfg: &ApplyConfig, record: &StateRecord, op: &ChangeOp) -> Attempted<OpOutcome> {
    let label = format!("{} {}", op.action, op.id);
    let unresolved = |e: AdapterError| Attempted {
        result: Err(e),
        attempts: 0,
    };

    match op.action {
        ChangeAction::Create => {
            let properties = match resolved_properties(record, op) {
                Ok(p) => p,
                Err(e) => return unresolved(e),
            };
            let attempted = retry::with_retry(&cfg.policy.retry, cfg.cancel, &label, || {
                cfg.adapter.create(op.kind, &op.id, &properties)
            });
            map_attempted(attempted, |p| OpOutcome::Provisioned {
                live_id: p.live_id,
                outputs: p.outputs,
            })
        }
        ChangeAction::Update => {
            let Some(live_id) = op
                .live_id
                .clone()
                .or_else(|| record.nodes.get(&op.id).map(|n| n.live_id.clone()))
            else {
                return unresolved(AdapterError::permanent(format!("'{}' has no live id", op.id)));
            };
            let properties = match resolved_properties(record, op) {
                Ok(p) => p,
                Err(e) => return unresolved(e),
            };
            let attempted = retry::with_retry(&cfg.policy.retry, cfg.cancel, &label, || {
                cfg.adapter.update(op.kind, &live_id, &properties)
            });
            map_attempted(attempted, |outputs| OpOutcome::Provisioned {
                live_id: live_id.clone(),
                outputs,
            })
        }
        ChangeAction::Delete => {
            let Some(live_id) = op
                .live_id
                .clone()
                .or_else(|| record.nodes.get(&op.id).map(|n| n.live_id.clone()))
            else {
                return unresolved(AdapterError::permanent(format!("'{}' has no live id", op.id)));
            };
            let attempted = retry::with_retry(&cfg.policy.retry, cfg.cancel, &label, || {
                cfg.adapter.delete(op.kind, &live_id)
            });
            map_attempted(attempted, |()| OpOutcome::Removed)
        }
    }
}

fn map_attempted<T, U>(attempted: Attempted<T>, f: impl FnOnce(T) -> U) -> Attempted<U> {
    Attempted {
        result: attempted.result.map(f),
        attempts: attempted.attempts,
    }
}

/// Write the op's result into the record. Returns the node's live id.
fn record_outcome(record: &mut StateRecord, op: &ChangeOp, outcome: OpOutcome) -> String {
    match outcome {
        OpOutcome::Provisioned { live_id, outputs } => {
            record.nodes.insert(
                op.id.clone(),
                NodeRecord {
                    kind: op.kind,
                    properties: op.properties.clone(),
                    policy: op.policy.clone(),
                    depends_on: op.depends_on.clone(),
                    live_id: live_id.clone(),
                    outputs,
                    applied_at: Some(eventlog::now_iso8601()),
                },
            );
            live_id
        }
        OpOutcome::Removed => record
            .nodes
            .shift_remove(&op.id)
            .map(|n| n.live_id)
            .or_else(|| op.live_id.clone())
            .unwrap_or_default(),
    }
}

// ============================================================================
// Reference resolution
// ============================================================================

fn lookup(record: &StateRecord, reference: &Reference) -> Result<String, AdapterError> {
    let node = record.nodes.get(&reference.target).ok_or_else(|| {
        AdapterError::permanent(format!(
            "unresolved reference {}: '{}' has not been applied",
            reference, reference.target
        ))
    })?;
    if reference.attr == LIVE_ID_ATTR {
        return Ok(node.live_id.clone());
    }
    node.outputs.get(&reference.attr).cloned().ok_or_else(|| {
        AdapterError::permanent(format!(
            "unresolved reference {}: no output '{}'",
            reference, reference.attr
        ))
    })
}

/// Replace every reference in `value` with the recorded string it names.
pub fn resolve_references(value: &Value, record: &StateRecord) -> Result<Value, AdapterError> {
    Ok(match value {
        Value::Ref(r) => Value::String(lookup(record, r)?),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|v| resolve_references(v, record))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), resolve_references(v, record)?)))
                .collect::<Result<_, AdapterError>>()?,
        ),
        other => other.clone(),
    })
}

/// IAM-style policy document for a node's statements.
fn policy_document(statements: &[PolicyStatement], record: &StateRecord) -> Result<Value, AdapterError> {
    let mut rendered = Vec::with_capacity(statements.len());
    for statement in statements {
        let resources = statement
            .resources
            .iter()
            .map(|v| resolve_references(v, record))
            .collect::<Result<Vec<_>, _>>()?;
        rendered.push(Value::map([
            ("effect", Value::from(statement.effect.to_string())),
            ("actions", Value::strings(&statement.actions.iter().collect::<Vec<_>>())),
            ("resources", Value::List(resources)),
        ]));
    }
    Ok(Value::map([
        ("version", Value::from("2012-10-17")),
        ("statements", Value::List(rendered)),
    ]))
}

fn resolved_properties(record: &StateRecord, op: &ChangeOp) -> Result<BTreeMap<String, Value>, AdapterError> {
    let mut properties = BTreeMap::new();
    for (key, value) in &op.properties {
        properties.insert(key.clone(), resolve_references(value, record)?);
    }
    if !op.policy.is_empty() {
        properties.insert("policy".to_string(), policy_document(&op.policy, record)?);
    }
    Ok(properties)
}
