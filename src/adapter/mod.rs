//! Provisioning adapters: the only path from the executor to a cloud.
//!
//! Properties handed to an adapter are fully resolved: references have
//! been replaced by live ids or output strings, and a node's policy
//! statements arrive as a `policy` document property.

pub mod local;
pub mod memory;

use crate::core::error::AdapterError;
use crate::core::types::{ResourceKind, Value};
use std::collections::BTreeMap;
use std::fmt;

/// What a provider reports after creating a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub live_id: String,
    pub outputs: BTreeMap<String, String>,
}

/// Provider verbs the executor drives.
pub trait ProvisioningAdapter: Send + Sync + fmt::Debug {
    /// Short name for logs ("memory", "local").
    fn name(&self) -> &'static str;

    fn create(
        &self,
        kind: ResourceKind,
        logical_id: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<Provisioned, AdapterError>;

    /// Update in place. Returns the refreshed outputs.
    fn update(
        &self,
        kind: ResourceKind,
        live_id: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, String>, AdapterError>;

    fn delete(&self, kind: ResourceKind, live_id: &str) -> Result<(), AdapterError>;

    /// Whether the live resource is still there. Providers that cannot tell
    /// report `true`, which makes resume trust the state record.
    fn exists(&self, _kind: ResourceKind, _live_id: &str) -> Result<bool, AdapterError> {
        Ok(true)
    }
}

/// Whether `properties` asks for the resource to survive deletion.
pub fn is_retained(properties: &BTreeMap<String, Value>) -> bool {
    properties.get("removal_policy").and_then(Value::as_str) == Some("retain")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Blind;

    impl ProvisioningAdapter for Blind {
        fn name(&self) -> &'static str {
            "blind"
        }

        fn create(
            &self,
            _kind: ResourceKind,
            logical_id: &str,
            _properties: &BTreeMap<String, Value>,
        ) -> Result<Provisioned, AdapterError> {
            Ok(Provisioned {
                live_id: logical_id.to_string(),
                outputs: BTreeMap::new(),
            })
        }

        fn update(
            &self,
            _kind: ResourceKind,
            _live_id: &str,
            _properties: &BTreeMap<String, Value>,
        ) -> Result<BTreeMap<String, String>, AdapterError> {
            Ok(BTreeMap::new())
        }

        fn delete(&self, _kind: ResourceKind, _live_id: &str) -> Result<(), AdapterError> {
            Err(AdapterError::permanent("read-only"))
        }
    }

    #[test]
    fn test_tr008_exists_defaults_true() {
        assert_eq!(Blind.exists(ResourceKind::Table, "anything"), Ok(true));
        assert!(!Blind.delete(ResourceKind::Table, "x").unwrap_err().is_transient());
    }

    #[test]
    fn test_tr008_is_retained() {
        let mut props = BTreeMap::new();
        assert!(!is_retained(&props));
        props.insert("removal_policy".to_string(), Value::from("retain"));
        assert!(is_retained(&props));
    }
}
