//! Per-kind resource knowledge.
//!
//! Each kind contributes:
//! 1. Typed constructors that emit declarative definitions
//! 2. Required-property and value validation
//! 3. The live identity a simulated provider assigns on create

pub mod api;
pub mod cluster;
pub mod function;
pub mod iam;
pub mod network;
pub mod table;

use crate::core::types::{Environment, ReferenceDecl, ResourceKind, ResourceNode, Value};
use crate::tripwire::hasher;
use std::collections::BTreeMap;

/// Properties every resource of `kind` must declare (directly or via a
/// reference).
pub fn required_properties(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Table => &["name", "partition_key"],
        ResourceKind::Function => &["name", "handler", "runtime", "code"],
        ResourceKind::Role => &["assumed_by"],
        ResourceKind::Policy => &["name"],
        ResourceKind::Network => &["cidr"],
        ResourceKind::Cluster => &["name", "version"],
        ResourceKind::Endpoint => &["endpoint_type"],
        ResourceKind::Repository => &["name"],
        ResourceKind::ChartBundle => &["cluster", "manifests"],
    }
}

/// Validate a definition's properties. Returns one message per problem.
pub fn validate_properties(
    kind: ResourceKind,
    properties: &BTreeMap<String, Value>,
    references: &[ReferenceDecl],
) -> Vec<String> {
    let mut errors: Vec<String> = required_properties(kind)
        .iter()
        .filter(|key| {
            !properties.contains_key(**key) && !references.iter().any(|r| r.property == **key)
        })
        .map(|key| format!("missing required property '{}'", key))
        .collect();

    errors.extend(match kind {
        ResourceKind::Table => table::validate(properties),
        ResourceKind::Function => function::validate(properties),
        ResourceKind::Network => network::validate(properties),
        ResourceKind::Endpoint => api::validate(properties),
        ResourceKind::Cluster => cluster::validate(properties),
        _ => Vec::new(),
    });
    errors
}

/// Validate an assembled node.
pub fn validate(node: &ResourceNode) -> Vec<String> {
    validate_properties(node.kind, &node.properties, &[])
}

/// Physical name: the `name` property when present, else the logical id.
pub fn physical_name<'a>(logical_id: &'a str, properties: &'a BTreeMap<String, Value>) -> &'a str {
    properties
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(logical_id)
}

/// Live id and output attributes a provider would report after creating
/// the resource. Deterministic in (kind, logical id, name, env).
pub fn live_identity(
    kind: ResourceKind,
    logical_id: &str,
    properties: &BTreeMap<String, Value>,
    env: &Environment,
) -> (String, BTreeMap<String, String>) {
    let name = physical_name(logical_id, properties);
    let kind_label = kind.to_string();
    let short = |len: usize| {
        hasher::short_id(&[kind_label.as_str(), logical_id, name, env.account.as_str()], len)
    };
    let (region, account) = (env.region.as_str(), env.account.as_str());
    let mut outputs = BTreeMap::new();

    let live_id = match kind {
        ResourceKind::Table => {
            outputs.insert(
                "arn".into(),
                format!("arn:aws:dynamodb:{}:{}:table/{}", region, account, name),
            );
            name.to_string()
        }
        ResourceKind::Function => {
            outputs.insert(
                "arn".into(),
                format!("arn:aws:lambda:{}:{}:function:{}", region, account, name),
            );
            name.to_string()
        }
        ResourceKind::Role => {
            outputs.insert("arn".into(), format!("arn:aws:iam::{}:role/{}", account, name));
            name.to_string()
        }
        ResourceKind::Policy => {
            outputs.insert(
                "arn".into(),
                format!("arn:aws:iam::{}:policy/{}", account, name),
            );
            name.to_string()
        }
        ResourceKind::Network => {
            let vpc = format!("vpc-{}", short(17));
            outputs.insert("vpc_id".into(), vpc.clone());
            vpc
        }
        ResourceKind::Cluster => {
            outputs.insert(
                "arn".into(),
                format!("arn:aws:eks:{}:{}:cluster/{}", region, account, name),
            );
            outputs.insert(
                "endpoint".into(),
                format!("https://{}.gr7.{}.eks.amazonaws.com", short(32), region),
            );
            name.to_string()
        }
        ResourceKind::Endpoint => {
            let id = short(10);
            if properties.get("endpoint_type").and_then(Value::as_str) == Some("rest_api") {
                outputs.insert(
                    "url".into(),
                    format!("https://{}.execute-api.{}.amazonaws.com/prod/", id, region),
                );
                outputs.insert("root_resource_id".into(), short(10).to_uppercase());
            }
            id
        }
        ResourceKind::Repository => {
            outputs.insert(
                "arn".into(),
                format!("arn:aws:ecr:{}:{}:repository/{}", region, account, name),
            );
            outputs.insert(
                "uri".into(),
                format!("{}.dkr.ecr.{}.amazonaws.com/{}", account, region, name),
            );
            name.to_string()
        }
        ResourceKind::ChartBundle => format!("chart-{}", short(12)),
    };

    outputs.insert("name".into(), name.to_string());
    (live_id, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr006_required_properties_reported() {
        let errors = validate_properties(ResourceKind::Function, &BTreeMap::new(), &[]);
        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("'name'"));
    }

    #[test]
    fn test_tr006_reference_satisfies_required() {
        let refs = vec![ReferenceDecl {
            property: "cluster".into(),
            target: "eks".into(),
            attribute: "name".into(),
        }];
        let mut props = BTreeMap::new();
        props.insert("manifests".into(), Value::List(vec![]));
        assert!(validate_properties(ResourceKind::ChartBundle, &props, &refs).is_empty());
    }

    #[test]
    fn test_tr006_live_identity_table() {
        let mut props = BTreeMap::new();
        props.insert("name".into(), Value::from("notisce-main"));
        let env = Environment {
            account: "123456789012".into(),
            region: "us-west-2".into(),
        };
        let (live, outputs) = live_identity(ResourceKind::Table, "table", &props, &env);
        assert_eq!(live, "notisce-main");
        assert_eq!(
            outputs["arn"],
            "arn:aws:dynamodb:us-west-2:123456789012:table/notisce-main"
        );
        assert_eq!(outputs["name"], "notisce-main");
    }

    #[test]
    fn test_tr006_live_identity_deterministic() {
        let env = Environment::default();
        let props = BTreeMap::new();
        let a = live_identity(ResourceKind::Network, "vpc", &props, &env);
        let b = live_identity(ResourceKind::Network, "vpc", &props, &env);
        assert_eq!(a, b);
        assert!(a.0.starts_with("vpc-"));
        assert_eq!(a.1["name"], "vpc");
    }

    #[test]
    fn test_tr006_rest_api_outputs_url() {
        let mut props = BTreeMap::new();
        props.insert("endpoint_type".into(), Value::from("rest_api"));
        let (live, outputs) =
            live_identity(ResourceKind::Endpoint, "api", &props, &Environment::default());
        assert!(outputs["url"].starts_with(&format!("https://{}.execute-api.", live)));
    }
}
