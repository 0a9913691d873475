//! Table resources: key schema, billing, secondary indexes.

use crate::core::types::{ResourceDefinition, ResourceKind, Value};
use std::collections::BTreeMap;

/// DynamoDB scalar attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
    Binary,
}

impl AttributeType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::String => "S",
            Self::Number => "N",
            Self::Binary => "B",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttribute {
    pub name: String,
    pub attr_type: AttributeType,
}

impl KeyAttribute {
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attr_type: AttributeType::String,
        }
    }

    fn to_value(&self) -> Value {
        Value::map([("name", self.name.as_str()), ("type", self.attr_type.code())])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingMode {
    PayPerRequest,
    Provisioned,
}

impl BillingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PayPerRequest => "PAY_PER_REQUEST",
            Self::Provisioned => "PROVISIONED",
        }
    }
}

/// What happens to the physical table when its node is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    Retain,
    Destroy,
}

impl RemovalPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retain => "retain",
            Self::Destroy => "destroy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSecondaryIndex {
    pub index_name: String,
    pub partition_key: KeyAttribute,
    pub sort_key: Option<KeyAttribute>,
}

impl GlobalSecondaryIndex {
    fn to_value(&self) -> Value {
        let mut entries = BTreeMap::new();
        entries.insert("index_name".to_string(), Value::from(self.index_name.as_str()));
        entries.insert("partition_key".to_string(), self.partition_key.to_value());
        if let Some(ref sk) = self.sort_key {
            entries.insert("sort_key".to_string(), sk.to_value());
        }
        Value::Map(entries)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProps {
    pub name: String,
    pub partition_key: KeyAttribute,
    pub sort_key: Option<KeyAttribute>,
    pub billing_mode: BillingMode,
    pub removal_policy: RemovalPolicy,
    pub point_in_time_recovery: bool,
}

impl TableProps {
    pub fn definition(&self, id: &str) -> ResourceDefinition {
        let mut def = ResourceDefinition::new(id, ResourceKind::Table)
            .property("name", self.name.as_str())
            .property("partition_key", self.partition_key.to_value())
            .property("billing_mode", self.billing_mode.as_str())
            .property("removal_policy", self.removal_policy.as_str())
            .property("point_in_time_recovery", self.point_in_time_recovery);
        if let Some(ref sk) = self.sort_key {
            def = def.property("sort_key", sk.to_value());
        }
        def
    }
}

/// Append a GSI to a table definition.
pub fn add_global_secondary_index(
    mut def: ResourceDefinition,
    index: &GlobalSecondaryIndex,
) -> ResourceDefinition {
    let entry = def
        .properties
        .entry("global_secondary_indexes".to_string())
        .or_insert_with(|| Value::List(Vec::new()));
    if let Value::List(items) = entry {
        items.push(index.to_value());
    }
    def
}

/// ARN pattern covering a table and its indexes, templated on the stack
/// environment.
pub fn arn_pattern(table_name: &str) -> String {
    format!(
        "arn:aws:dynamodb:{{{{env.region}}}}:{{{{env.account}}}}:table/{}*",
        table_name
    )
}

fn key_is_valid(value: &Value) -> bool {
    match value {
        Value::Map(m) => {
            m.get("name").and_then(Value::as_str).is_some()
                && matches!(m.get("type").and_then(Value::as_str), Some("S" | "N" | "B"))
        }
        _ => false,
    }
}

pub(crate) fn validate(properties: &BTreeMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();
    for key in ["partition_key", "sort_key"] {
        if let Some(v) = properties.get(key) {
            if !key_is_valid(v) {
                errors.push(format!("{} must be {{name, type: S|N|B}}", key));
            }
        }
    }
    if let Some(mode) = properties.get("billing_mode") {
        if !matches!(mode.as_str(), Some("PAY_PER_REQUEST" | "PROVISIONED")) {
            errors.push("billing_mode must be PAY_PER_REQUEST or PROVISIONED".to_string());
        }
    }
    if let Some(Value::List(indexes)) = properties.get("global_secondary_indexes") {
        for index in indexes {
            let ok = match index {
                Value::Map(m) => {
                    m.get("index_name").and_then(Value::as_str).is_some()
                        && m.get("partition_key").is_some_and(key_is_valid)
                }
                _ => false,
            };
            if !ok {
                errors.push("global secondary index needs index_name and partition_key".into());
            }
        }
    }
    errors
}
