//! Roles, managed policy attachments and shared statements.

use super::table;
use crate::core::types::{PolicyStatement, ResourceDefinition, ResourceKind, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleProps {
    /// Service principal, e.g. `lambda.amazonaws.com`
    pub assumed_by: String,
    pub managed_policies: Vec<String>,
}

impl RoleProps {
    pub fn service(principal: &str) -> Self {
        Self {
            assumed_by: principal.to_string(),
            managed_policies: Vec::new(),
        }
    }

    pub fn with_managed_policy(mut self, name: &str) -> Self {
        self.managed_policies.push(managed_policy_arn(name));
        self
    }

    pub fn definition(&self, id: &str) -> ResourceDefinition {
        let mut def = ResourceDefinition::new(id, ResourceKind::Role)
            .property("assumed_by", self.assumed_by.as_str());
        if !self.managed_policies.is_empty() {
            def = def.property("managed_policies", Value::strings(self.managed_policies.as_slice()));
        }
        def
    }
}

pub fn managed_policy_arn(name: &str) -> String {
    format!("arn:aws:iam::aws:policy/{}", name)
}

/// Data-plane access shared by every notisce workload: the main table
/// and the `/notisce/*` parameter tree, scoped to the stack's env.
pub fn basic_policy_statements() -> Vec<PolicyStatement> {
    vec![
        PolicyStatement::allow(
            [
                "dynamodb:GetItem",
                "dynamodb:PutItem",
                "dynamodb:UpdateItem",
                "dynamodb:DeleteItem",
                "dynamodb:Query",
            ],
            [table::arn_pattern("notisce-main")],
        ),
        PolicyStatement::allow(
            ["ssm:GetParameter", "ssm:GetParameters", "ssm:GetParametersByPath"],
            ["arn:aws:ssm:{{env.region}}:{{env.account}}:parameter/notisce/*"],
        ),
    ]
}
