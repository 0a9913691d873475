//! Built-in notisce stacks: the datasource table, the REST API with its
//! route functions, and the subscriber cluster.

use crate::core::parser::{ProjectConfig, StackDecl};
use crate::core::types::{Environment, Policy, ResourceDefinition, Value};
use crate::resources::api::{self, ApiKeySource};
use crate::resources::cluster::{self, ClusterProps};
use crate::resources::function::{self, Artifact, FunctionProps};
use crate::resources::iam::{self, RoleProps};
use crate::resources::network::{NetworkProps, SubnetConfig, SubnetType};
use crate::resources::table::{
    self, BillingMode, GlobalSecondaryIndex, KeyAttribute, RemovalPolicy, TableProps,
};
use indexmap::IndexMap;
use std::collections::BTreeMap;

pub const DATASOURCE: &str = "notisce-datasource";
pub const RESTAPI: &str = "notisce-restapi";
pub const CLUSTER: &str = "notisce-cluster";

/// Routes served by one Go function each.
pub const ROUTES: &[&str] = &["subscribe"];

pub fn datasource() -> Vec<ResourceDefinition> {
    let props = TableProps {
        name: "notisce-main".to_string(),
        partition_key: KeyAttribute::string("PK"),
        sort_key: Some(KeyAttribute::string("SK")),
        billing_mode: BillingMode::PayPerRequest,
        removal_policy: RemovalPolicy::Retain,
        point_in_time_recovery: true,
    };
    let gsi = GlobalSecondaryIndex {
        index_name: "GSI-1".to_string(),
        partition_key: KeyAttribute::string("PK"),
        sort_key: Some(KeyAttribute::string("Timestamp")),
    };
    vec![table::add_global_secondary_index(props.definition("table"), &gsi)]
}

pub fn restapi() -> Vec<ResourceDefinition> {
    let mut defs = vec![
        api::rest_api("api", "claime-api", ApiKeySource::Header),
        api::api_key("api-key", "claime", "api"),
        api::usage_plan("usage-plan", "api", "api-key"),
    ];
    for route in ROUTES {
        let role_id = format!("{}-role", route);
        let resource_id = format!("{}-resource", route);
        defs.push(RoleProps::service("lambda.amazonaws.com").definition(&role_id));
        defs.push(
            FunctionProps::go(route, Artifact::for_route(route))
                .definition(route, &role_id)
                .statement(function::invoke_all_statement()),
        );
        defs.push(api::resource(&resource_id, "api", route));
        defs.push(api::lambda_method(
            &format!("{}-put", route),
            "api",
            &resource_id,
            "PUT",
            route,
        ));
    }
    defs
}

pub fn cluster() -> Vec<ResourceDefinition> {
    let network = NetworkProps {
        cidr: "192.168.0.0/16".to_string(),
        nat_gateways: 1,
        subnets: vec![
            SubnetConfig::new("Public1", SubnetType::Public, 24),
            SubnetConfig::new("Public2", SubnetType::Public, 24),
            SubnetConfig::new("Private1", SubnetType::Private, 24),
            SubnetConfig::new("Private2", SubnetType::Private, 24),
        ],
    };

    let mut role = RoleProps::service("eks.amazonaws.com")
        .with_managed_policy("AmazonEKSClusterPolicy")
        .with_managed_policy("AmazonEKSServicePolicy")
        .definition("eks-role");
    for statement in iam::basic_policy_statements() {
        role = role.statement(statement);
    }

    let eks = ClusterProps {
        name: "notisce-subscriber".to_string(),
        version: "1.21".to_string(),
        node_count: 1,
        instance_type: "t2.medium".to_string(),
        subnets: network
            .private_subnets()
            .into_iter()
            .map(String::from)
            .collect(),
    };

    vec![
        network.definition("vpc"),
        role,
        eks.definition("cluster", "vpc", "eks-role"),
        cluster::chart_bundle("chart", "cluster", hello_kubernetes()),
    ]
}

fn labels() -> Value {
    Value::map([("app", "hello-kubernetes")])
}

/// Service plus single-replica deployment of `paulbouwer/hello-kubernetes`.
fn hello_kubernetes() -> Vec<Value> {
    let service = Value::map([
        ("apiVersion", Value::from("v1")),
        ("kind", Value::from("Service")),
        ("metadata", Value::map([("name", "notisce-chart-service")])),
        (
            "spec",
            Value::map([
                (
                    "ports",
                    Value::List(vec![Value::map([
                        ("port", Value::from(80u64)),
                        ("targetPort", Value::from(8080u64)),
                    ])]),
                ),
                ("selector", labels()),
            ]),
        ),
    ]);

    let container = Value::map([
        ("name", Value::from("app")),
        ("image", Value::from("paulbouwer/hello-kubernetes:1.7")),
        (
            "ports",
            Value::List(vec![Value::map([("containerPort", Value::from(8080u64))])]),
        ),
    ]);
    let deployment = Value::map([
        ("apiVersion", Value::from("apps/v1")),
        ("kind", Value::from("Deployment")),
        ("metadata", Value::map([("name", "notisce-chart-deployment")])),
        (
            "spec",
            Value::map([
                ("replicas", Value::from(1u64)),
                ("selector", Value::map([("matchLabels", labels())])),
                (
                    "template",
                    Value::map([
                        ("metadata", Value::map([("labels", labels())])),
                        (
                            "spec",
                            Value::map([("containers", Value::List(vec![container]))]),
                        ),
                    ]),
                ),
            ]),
        ),
    ]);

    vec![service, deployment]
}

/// The whole notisce project, as `terrace init` writes it.
pub fn notisce_project() -> ProjectConfig {
    let mut stacks = IndexMap::new();
    for (name, description, resources) in [
        (DATASOURCE, "DynamoDB table backing subscriptions", datasource()),
        (RESTAPI, "API Gateway with one Go function per route", restapi()),
        (CLUSTER, "EKS cluster running the subscriber chart", cluster()),
    ] {
        stacks.insert(
            name.to_string(),
            StackDecl {
                description: Some(description.to_string()),
                resources,
            },
        );
    }

    ProjectConfig {
        version: "1.0".to_string(),
        name: "notisce".to_string(),
        description: Some("Notification subscription service".to_string()),
        env: Environment::default(),
        params: BTreeMap::new(),
        policy: Policy::default(),
        stacks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryCloud;
    use crate::core::builder::build_stack;
    use crate::core::cancel::CancelSignal;
    use crate::core::executor::{apply, ApplyConfig};
    use crate::core::parser::{parse_project, validate_project};
    use crate::core::planner;
    use crate::core::retry::RetryConfig;
    use crate::core::state::{MemoryStateStore, StateStore};
    use crate::core::types::{ChangeAction, ResourceKind};

    #[test]
    fn test_tr016_project_validates() {
        let project = notisce_project();
        let errors = validate_project(&project);
        assert!(
            errors.is_empty(),
            "unexpected errors: {:?}",
            errors.iter().map(|e| &e.message).collect::<Vec<_>>()
        );
        assert_eq!(
            project.stacks.keys().collect::<Vec<_>>(),
            vec![DATASOURCE, RESTAPI, CLUSTER]
        );
    }

    #[test]
    fn test_tr016_every_stack_builds() {
        let project = notisce_project();
        for name in project.stacks.keys() {
            let graph = build_stack(&project, name).unwrap();
            assert!(graph.is_frozen());
            assert!(!graph.is_empty());
        }
    }

    #[test]
    fn test_tr016_yaml_round_trip() {
        let project = notisce_project();
        let yaml = serde_yaml_ng::to_string(&project).unwrap();
        assert_eq!(parse_project(&yaml).unwrap(), project);
    }

    #[test]
    fn test_tr016_restapi_order() {
        let project = notisce_project();
        let graph = build_stack(&project, RESTAPI).unwrap();
        let plan = planner::plan(&graph, None).unwrap();
        let ids: Vec<&str> = plan.ops.iter().map(|op| op.id.as_str()).collect();
        let pos = |id: &str| ids.iter().position(|x| *x == id).unwrap();
        assert!(pos("subscribe-role") < pos("subscribe"));
        assert!(pos("subscribe") < pos("subscribe-put"));
        assert!(pos("api") < pos("usage-plan"));
        assert!(pos("api-key") < pos("usage-plan"));
        assert!(plan.ops.iter().all(|op| op.action == ChangeAction::Create));
    }

    #[test]
    fn test_tr016_cluster_role_statements_resolved() {
        let project = notisce_project();
        let graph = build_stack(&project, CLUSTER).unwrap();
        let role = graph.get("eks-role").unwrap();
        assert_eq!(role.policy.len(), 2);
        let text = serde_json::to_string(&role.policy).unwrap();
        assert!(text.contains("arn:aws:dynamodb:us-east-1:000000000000:table/notisce-main*"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_tr016_apply_every_stack_in_memory() {
        let project = notisce_project();
        let cloud = MemoryCloud::new(project.env.clone());
        let store = MemoryStateStore::new();
        let policy = Policy {
            retry: RetryConfig::immediate(1),
            tripwire: false,
        };
        let cancel = CancelSignal::new();
        let cfg = ApplyConfig {
            adapter: &cloud,
            store: &store,
            policy: &policy,
            cancel: &cancel,
        };
        for name in project.stacks.keys() {
            let graph = build_stack(&project, name).unwrap();
            let plan = planner::plan(&graph, None).unwrap();
            let result = apply(&cfg, &plan).unwrap();
            assert!(result.is_success(), "{} failed: {}", name, result.status);
        }
        assert_eq!(store.stacks().unwrap().len(), 3);
        let chart = store.load(CLUSTER).unwrap().unwrap();
        assert!(chart.nodes["chart"].live_id.starts_with("chart-"));
        assert!(cloud.get(ResourceKind::Cluster, "notisce-subscriber").is_some());
    }
}
