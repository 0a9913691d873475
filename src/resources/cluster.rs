//! Kubernetes clusters and the chart bundles deployed onto them.

use crate::core::types::{ResourceDefinition, ResourceKind, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterProps {
    pub name: String,
    pub version: String,
    pub node_count: u32,
    pub instance_type: String,
    /// Subnet names (of the referenced network) that host the nodes
    pub subnets: Vec<String>,
}

impl ClusterProps {
    /// Cluster placed in `network_id` and running as `role_id`. The role is
    /// both the service role and the masters role.
    pub fn definition(&self, id: &str, network_id: &str, role_id: &str) -> ResourceDefinition {
        ResourceDefinition::new(id, ResourceKind::Cluster)
            .property("name", self.name.as_str())
            .property("version", self.version.as_str())
            .property("default_capacity", u64::from(self.node_count))
            .property("instance_type", self.instance_type.as_str())
            .property("subnets", Value::strings(self.subnets.as_slice()))
            .reference("vpc_id", network_id, "vpc_id")
            .reference("role", role_id, "arn")
            .reference("masters_role", role_id, "arn")
    }
}

/// Chart bundle applied to the cluster `cluster_id`. Manifests are opaque.
pub fn chart_bundle(id: &str, cluster_id: &str, manifests: Vec<Value>) -> ResourceDefinition {
    ResourceDefinition::new(id, ResourceKind::ChartBundle)
        .property("manifests", Value::List(manifests))
        .reference("cluster", cluster_id, "name")
}

fn version_is_valid(version: &str) -> bool {
    match version.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

pub(crate) fn validate(properties: &BTreeMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(version) = properties.get("version") {
        if !version.as_str().is_some_and(version_is_valid) {
            errors.push("version must look like '1.21'".to_string());
        }
    }
    if let Some(capacity) = properties.get("default_capacity") {
        let ok = matches!(capacity, Value::Number(n) if n.as_u64().is_some_and(|c| c >= 1));
        if !ok {
            errors.push("default_capacity must be a positive integer".to_string());
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> ClusterProps {
        ClusterProps {
            name: "notisce-subscriber".into(),
            version: "1.21".into(),
            node_count: 1,
            instance_type: "t2.medium".into(),
            subnets: vec!["Private1".into(), "Private2".into()],
        }
    }

    #[test]
    fn test_tr006_cluster_definition() {
        let def = props().definition("cluster", "vpc", "eks-role");
        assert!(validate(&def.properties).is_empty());
        let targets: Vec<_> = def.references.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["vpc", "eks-role", "eks-role"]);
    }

    #[test]
    fn test_tr006_cluster_bad_version() {
        let mut p = props();
        p.version = "latest".into();
        p.node_count = 0;
        assert_eq!(validate(&p.definition("c", "v", "r").properties).len(), 2);
    }

    #[test]
    fn test_tr006_chart_bundle_references_cluster() {
        let def = chart_bundle("chart", "cluster", vec![Value::map([("kind", "Service")])]);
        assert_eq!(def.references[0].property, "cluster");
        assert_eq!(def.references[0].attribute, "name");
    }
}
