//! TR-011: Plan generation: diff a frozen graph against the last-applied
//! state record.
//!
//! Creates and updates follow the graph's topological order; deletes come
//! last, in reverse of the recorded graph's order so dependents go first.
//! Planning is pure: no I/O, no adapter calls.

use super::error::PlanError;
use super::graph::ResourceGraph;
use super::resolver;
use super::types::{ChangeAction, ChangeOp, ChangePlan, NodeRecord, ResourceNode, StateRecord};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};

/// Diff `desired` against `prior` and produce an ordered change plan.
pub fn plan(desired: &ResourceGraph, prior: Option<&StateRecord>) -> Result<ChangePlan, PlanError> {
    if !desired.is_frozen() {
        return Err(PlanError::NotFrozen(desired.stack().to_string()));
    }
    if let Some(record) = prior {
        if record.stack != desired.stack() {
            return Err(PlanError::StackMismatch {
                desired: desired.stack().to_string(),
                recorded: record.stack.clone(),
            });
        }
    }

    let empty = IndexMap::new();
    let prior_nodes = prior.map(|r| &r.nodes).unwrap_or(&empty);

    let mut ops = Vec::new();
    for id in desired.topological_order()? {
        let node = desired
            .get(&id)
            .ok_or_else(|| PlanError::Graph(super::error::GraphError::UnknownResource(id.clone())))?;
        match prior_nodes.get(&id) {
            None => ops.push(upsert_op(ChangeAction::Create, node, None)),
            Some(record) if record.kind != node.kind => {
                return Err(PlanError::PlanConflict {
                    resource: id,
                    reason: format!(
                        "kind changed from {} to {}; delete and re-create it under a new id",
                        record.kind, node.kind
                    ),
                });
            }
            Some(record) if record.properties == node.properties && record.policy == node.policy => {}
            Some(record) => ops.push(upsert_op(
                ChangeAction::Update,
                node,
                Some(record.live_id.clone()),
            )),
        }
    }

    ops.extend(delete_ops(prior_nodes, |id| !desired.contains(id))?);
    check_ordering(&ops, desired, prior_nodes)?;

    let fingerprint = fingerprint(desired.stack(), &ops)?;
    let prior_digest = state_digest(prior_nodes)?;
    log::debug!(
        "planned stack '{}': {} create, {} update, {} delete",
        desired.stack(),
        ops.iter().filter(|o| o.action == ChangeAction::Create).count(),
        ops.iter().filter(|o| o.action == ChangeAction::Update).count(),
        ops.iter().filter(|o| o.action == ChangeAction::Delete).count(),
    );
    Ok(ChangePlan {
        stack: desired.stack().to_string(),
        ops,
        fingerprint,
        prior_digest: Some(prior_digest),
    })
}

/// Plan that deletes every recorded node, dependents first.
pub fn plan_destroy(prior: &StateRecord) -> Result<ChangePlan, PlanError> {
    let ops = delete_ops(&prior.nodes, |_| true)?;
    let fingerprint = fingerprint(&prior.stack, &ops)?;
    Ok(ChangePlan {
        stack: prior.stack.clone(),
        ops,
        fingerprint,
        prior_digest: Some(state_digest(&prior.nodes)?),
    })
}

fn upsert_op(action: ChangeAction, node: &ResourceNode, live_id: Option<String>) -> ChangeOp {
    ChangeOp {
        action,
        id: node.id.clone(),
        kind: node.kind,
        properties: node.properties.clone(),
        policy: node.policy.clone(),
        depends_on: node.dependencies().into_iter().map(String::from).collect(),
        live_id,
    }
}

fn delete_ops<F>(prior_nodes: &IndexMap<String, NodeRecord>, selected: F) -> Result<Vec<ChangeOp>, PlanError>
where
    F: Fn(&str) -> bool,
{
    if !prior_nodes.keys().any(|id| selected(id)) {
        return Ok(Vec::new());
    }
    let order = resolver::topological_order(
        prior_nodes
            .iter()
            .map(|(id, record)| (id.as_str(), record.dependencies())),
    )?;
    Ok(order
        .iter()
        .rev()
        .filter(|id| selected(id))
        .filter_map(|id| {
            prior_nodes.get(id.as_str()).map(|record| ChangeOp {
                action: ChangeAction::Delete,
                id: id.clone(),
                kind: record.kind,
                properties: BTreeMap::new(),
                policy: Vec::new(),
                depends_on: Vec::new(),
                live_id: Some(record.live_id.clone()),
            })
        })
        .collect())
}

/// Every dependency of a create/update is either applied earlier in the
/// plan or unchanged in prior state; no delete target is still referenced.
fn check_ordering(
    ops: &[ChangeOp],
    desired: &ResourceGraph,
    prior_nodes: &IndexMap<String, NodeRecord>,
) -> Result<(), PlanError> {
    let position: HashMap<&str, usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| op.action != ChangeAction::Delete)
        .map(|(i, op)| (op.id.as_str(), i))
        .collect();

    for (i, op) in ops.iter().enumerate() {
        match op.action {
            ChangeAction::Create | ChangeAction::Update => {
                for dep in &op.depends_on {
                    let ok = match position.get(dep.as_str()) {
                        Some(&j) => j < i,
                        None => prior_nodes.contains_key(dep) && desired.contains(dep),
                    };
                    if !ok {
                        return Err(PlanError::PlanConflict {
                            resource: op.id.clone(),
                            reason: format!("dependency '{}' is not applied before it", dep),
                        });
                    }
                }
            }
            ChangeAction::Delete => {
                if let Some(user) = desired
                    .nodes()
                    .find(|n| n.dependencies().contains(&op.id.as_str()))
                {
                    return Err(PlanError::PlanConflict {
                        resource: op.id.clone(),
                        reason: format!("deleted while '{}' still references it", user.id),
                    });
                }
            }
        }
    }
    Ok(())
}

/// BLAKE3 over the canonical JSON of a record's nodes. An absent record
/// digests like an empty one.
pub fn state_digest(nodes: &IndexMap<String, NodeRecord>) -> Result<String, PlanError> {
    let json = serde_json::to_string(nodes).map_err(|e| PlanError::Encode(e.to_string()))?;
    Ok(hasher::hash_string(&json))
}

/// BLAKE3 over the canonical JSON of the stack name and ops.
fn fingerprint(stack: &str, ops: &[ChangeOp]) -> Result<String, PlanError> {
    let json = serde_json::to_string(&(stack, ops)).map_err(|e| PlanError::Encode(e.to_string()))?;
    Ok(hasher::hash_string(&json))
}
