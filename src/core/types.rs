//! TR-001: Resource model: kinds, values, references, policy statements,
//! change plans, state records and provenance events.
//!
//! Everything that crosses a file boundary (project YAML, state YAML, event
//! JSONL, plan JSON) derives Serialize/Deserialize. Maps are `BTreeMap` so
//! serialized output is byte-stable across runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Kinds
// ============================================================================

/// Provisionable unit kinds. Closed set; per-kind behavior lives in
/// `crate::resources`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Table,
    Function,
    Role,
    Policy,
    Network,
    Cluster,
    Endpoint,
    Repository,
    ChartBundle,
}

impl ResourceKind {
    /// Only roles and functions carry IAM-style statements.
    pub fn accepts_policy(&self) -> bool {
        matches!(self, Self::Role | Self::Function)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Function => write!(f, "function"),
            Self::Role => write!(f, "role"),
            Self::Policy => write!(f, "policy"),
            Self::Network => write!(f, "network"),
            Self::Cluster => write!(f, "cluster"),
            Self::Endpoint => write!(f, "endpoint"),
            Self::Repository => write!(f, "repository"),
            Self::ChartBundle => write!(f, "chart_bundle"),
        }
    }
}

// ============================================================================
// Values and references
// ============================================================================

/// Attribute name that resolves to the target's live identifier.
pub const LIVE_ID_ATTR: &str = "id";

fn default_attr() -> String {
    LIVE_ID_ATTR.to_string()
}

/// Pointer from a property to another node's live id or output attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    #[serde(rename = "ref")]
    pub target: String,
    #[serde(default = "default_attr")]
    pub attr: String,
}

impl Reference {
    pub fn new(target: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            attr: attr.into(),
        }
    }

    /// Reference to the target's live identifier.
    pub fn id(target: impl Into<String>) -> Self {
        Self::new(target, LIVE_ID_ATTR)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attr)
    }
}

/// A property value: literal, reference placeholder, or list/map thereof.
///
/// `Ref` is tried before `Map` so `{ref: x, attr: arn}` parses as a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Ref(Reference),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map value from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list of string values.
    pub fn strings<S: AsRef<str>>(items: &[S]) -> Self {
        Self::List(items.iter().map(|s| Value::from(s.as_ref())).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// All references nested anywhere inside this value.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Self::Map(entries) => entries.values().for_each(|v| v.collect_references(out)),
            Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

// ============================================================================
// Policy statements
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "Allow"),
            Self::Deny => write!(f, "Deny"),
        }
    }
}

/// IAM-style statement attached to a role or function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(default)]
    pub effect: Effect,
    pub actions: BTreeSet<String>,
    pub resources: Vec<Value>,
}

impl PolicyStatement {
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<Value>,
    {
        Self {
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn deny<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<Value>,
    {
        Self {
            effect: Effect::Deny,
            ..Self::allow(actions, resources)
        }
    }

    pub fn references(&self) -> Vec<&Reference> {
        self.resources.iter().flat_map(Value::references).collect()
    }
}

/// Sorted, de-duplicated ids a node consumes: property references, policy
/// references and explicit `depends_on` entries.
pub fn dependency_ids<'a>(
    properties: &'a BTreeMap<String, Value>,
    policy: &'a [PolicyStatement],
    depends_on: &'a [String],
) -> Vec<&'a str> {
    let mut ids: Vec<&str> = properties
        .values()
        .flat_map(Value::references)
        .chain(policy.iter().flat_map(PolicyStatement::references))
        .map(|r| r.target.as_str())
        .chain(depends_on.iter().map(String::as_str))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

// ============================================================================
// Nodes and declarative definitions
// ============================================================================

/// One provisionable unit inside a resource graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<PolicyStatement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceNode {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: BTreeMap::new(),
            policy: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn dependencies(&self) -> Vec<&str> {
        dependency_ids(&self.properties, &self.policy, &self.depends_on)
    }

    /// Every reference with the property it sits under (`policy` for
    /// statement resources).
    pub fn reference_sites(&self) -> Vec<(&str, &Reference)> {
        let mut sites: Vec<(&str, &Reference)> = Vec::new();
        for (key, value) in &self.properties {
            sites.extend(value.references().into_iter().map(|r| (key.as_str(), r)));
        }
        for statement in &self.policy {
            sites.extend(statement.references().into_iter().map(|r| ("policy", r)));
        }
        sites
    }
}

/// Reference declaration in a resource definition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDecl {
    pub property: String,
    pub target: String,
    #[serde(default = "default_attr")]
    pub attribute: String,
}

/// Declarative resource-definition record, as read from a project file or
/// produced by the built-in stack constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferenceDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<PolicyStatement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceDefinition {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: BTreeMap::new(),
            references: Vec::new(),
            policy: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn reference(
        mut self,
        property: impl Into<String>,
        target: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        self.references.push(ReferenceDecl {
            property: property.into(),
            target: target.into(),
            attribute: attribute.into(),
        });
        self
    }

    pub fn statement(mut self, statement: PolicyStatement) -> Self {
        self.policy.push(statement);
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

// ============================================================================
// Environment and execution policy
// ============================================================================

/// Account/region pair substituted into `{{env.*}}` templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            account: default_account(),
            region: default_region(),
        }
    }
}

fn default_account() -> String {
    "000000000000".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Adapter retry behavior for transient errors
    #[serde(default)]
    pub retry: super::retry::RetryConfig,

    /// Append provenance events to the stack's event log
    #[serde(default = "default_true")]
    pub tripwire: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            retry: super::retry::RetryConfig::default(),
            tripwire: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Change plan
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single planned operation on one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOp {
    pub action: ChangeAction,
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<PolicyStatement>,
    /// Resources whose outputs this op consumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_id: Option<String>,
}

/// Ordered list of operations for one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePlan {
    pub stack: String,
    pub ops: Vec<ChangeOp>,
    /// BLAKE3 over the canonical JSON encoding of `ops`
    pub fingerprint: String,
    /// Digest of the recorded nodes the plan was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_digest: Option<String>,
}

impl ChangePlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn count(&self, action: ChangeAction) -> usize {
        self.ops.iter().filter(|op| op.action == action).count()
    }

    /// `(action, id)` pairs in plan order.
    pub fn summary(&self) -> Vec<(ChangeAction, &str)> {
        self.ops.iter().map(|op| (op.action, op.id.as_str())).collect()
    }
}

// ============================================================================
// State records
// ============================================================================

/// Last-applied snapshot of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub kind: ResourceKind,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<PolicyStatement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub live_id: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub applied_at: Option<String>,
}

impl NodeRecord {
    pub fn dependencies(&self) -> Vec<&str> {
        dependency_ids(&self.properties, &self.policy, &self.depends_on)
    }
}

/// Outcome of the most recent apply run for a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    InProgress,
    PartiallyFailed { op_index: usize, error: String },
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::InProgress => write!(f, "IN-PROGRESS"),
            Self::PartiallyFailed { op_index, .. } => {
                write!(f, "PARTIALLY-FAILED-AT-OP-{}", op_index)
            }
        }
    }
}

/// Persisted per-stack state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub schema: String,
    pub stack: String,
    pub generated_at: String,
    pub generator: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_applied_op_index: Option<usize>,
    #[serde(default)]
    pub plan_fingerprint: Option<String>,
    #[serde(default)]
    pub nodes: IndexMap<String, NodeRecord>,
}

// ============================================================================
// Execution result
// ============================================================================

/// Result of one apply run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stack: String,
    pub status: RunStatus,
    pub ops_applied: u32,
    pub ops_skipped: u32,
    pub total_duration: std::time::Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn failed_op(&self) -> Option<usize> {
        match self.status {
            RunStatus::PartiallyFailed { op_index, .. } => Some(op_index),
            _ => None,
        }
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        stack: String,
        run_id: String,
        plan_fingerprint: String,
        ops: usize,
    },
    OpStarted {
        stack: String,
        index: usize,
        resource: String,
        action: String,
    },
    OpSucceeded {
        stack: String,
        index: usize,
        resource: String,
        live_id: String,
        attempts: u32,
        duration_seconds: f64,
    },
    OpSkipped {
        stack: String,
        index: usize,
        resource: String,
    },
    OpFailed {
        stack: String,
        index: usize,
        resource: String,
        attempts: u32,
        error: String,
    },
    ApplyCompleted {
        stack: String,
        run_id: String,
        ops_applied: u32,
        ops_skipped: u32,
        ops_failed: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}
