//! TR-005: Project file parsing and validation.
//!
//! Parses terrace.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Stack names are path-safe (`[A-Za-z0-9_-]+`)
//! - Resource ids are unique per stack
//! - Reference and depends_on targets exist in the same stack
//! - Policy statements only on roles and functions
//! - Required properties per resource kind

use super::state;
use super::types::{Environment, Policy, ResourceDefinition, Value};
use crate::resources;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Root configuration: the desired state of every stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Project name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Account and region for `{{env.*}}` substitution
    #[serde(default)]
    pub env: Environment,

    /// Global parameters for `{{params.*}}` substitution
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,

    /// Stacks by name (order-preserving)
    #[serde(default)]
    pub stacks: IndexMap<String, StackDecl>,
}

/// Declarations for one stack.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StackDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a project file from disk.
pub fn parse_project_file(path: &Path) -> Result<ProjectConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_project(&content)
}

/// Parse a project from a YAML string.
pub fn parse_project(yaml: &str) -> Result<ProjectConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed project. Returns every error found (empty = valid).
pub fn validate_project(project: &ProjectConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if project.version != "1.0" {
        push(format!(
            "version must be \"1.0\", got \"{}\"",
            project.version
        ));
    }
    if project.name.is_empty() {
        push("name must not be empty".to_string());
    }

    for (stack, decl) in &project.stacks {
        if let Err(e) = state::check_stack_name(stack) {
            push(e.to_string());
        }
        let mut seen = HashSet::new();
        for def in &decl.resources {
            if !seen.insert(def.id.as_str()) {
                push(format!("{}: duplicate resource id '{}'", stack, def.id));
            }
        }

        for def in &decl.resources {
            let targets = def
                .references
                .iter()
                .map(|r| ("references", r.target.as_str()))
                .chain(
                    def.properties
                        .values()
                        .flat_map(Value::references)
                        .map(|r| ("properties", r.target.as_str())),
                )
                .chain(
                    def.policy
                        .iter()
                        .flat_map(|s| s.references())
                        .map(|r| ("policy", r.target.as_str())),
                )
                .chain(def.depends_on.iter().map(|d| ("depends_on", d.as_str())));
            for (site, target) in targets {
                if !seen.contains(target) {
                    push(format!(
                        "{}: resource '{}' {} unknown resource '{}'",
                        stack,
                        def.id,
                        if site == "depends_on" {
                            "depends on"
                        } else {
                            "references"
                        },
                        target
                    ));
                } else if target == def.id {
                    push(format!("{}: resource '{}' references itself", stack, def.id));
                }
            }

            if !def.policy.is_empty() && !def.kind.accepts_policy() {
                push(format!(
                    "{}: resource '{}' ({}) cannot carry policy statements",
                    stack, def.id, def.kind
                ));
            }

            for message in resources::validate_properties(def.kind, &def.properties, &def.references)
            {
                push(format!("{}: resource '{}' {}", stack, def.id, message));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResourceKind;

    const VALID: &str = r#"
version: "1.0"
name: notisce
env:
  account: "123456789012"
  region: ap-northeast-1
params:
  table: notisce-main
stacks:
  notisce-datasource:
    resources:
      - id: table
        kind: table
        properties:
          name: "{{params.table}}"
          partition_key: { name: PK, type: S }
  notisce-restapi:
    resources:
      - id: subscribe-role
        kind: role
        properties:
          assumed_by: lambda.amazonaws.com
        policy:
          - actions: ["lambda:*"]
            resources: ["*"]
      - id: subscribe
        kind: function
        properties:
          name: subscribe
          handler: bin/main
          runtime: go1.x
          code: { path: lib/functions/subscribe/bin/main.zip }
        references:
          - { property: role, target: subscribe-role, attribute: arn }
"#;

    #[test]
    fn test_tr005_parse_valid() {
        let project = parse_project(VALID).unwrap();
        assert_eq!(project.name, "notisce");
        assert_eq!(project.env.region, "ap-northeast-1");
        assert_eq!(project.stacks.len(), 2);
        let restapi = &project.stacks["notisce-restapi"];
        assert_eq!(restapi.resources[1].kind, ResourceKind::Function);
        assert_eq!(restapi.resources[1].references[0].attribute, "arn");
        let errors = validate_project(&project);
        assert!(
            errors.is_empty(),
            "unexpected errors: {:?}",
            errors.iter().map(|e| &e.message).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_tr005_defaults() {
        let project = parse_project("version: \"1.0\"\nname: x\n").unwrap();
        assert_eq!(project.env, Environment::default());
        assert!(project.policy.tripwire);
        assert_eq!(project.policy.retry.max_attempts, 3);
        assert!(project.stacks.is_empty());
    }

    #[test]
    fn test_tr005_bad_version() {
        let project = parse_project("version: \"2.0\"\nname: x\n").unwrap();
        let errors = validate_project(&project);
        assert!(errors.iter().any(|e| e.message.contains("version")));
    }

    #[test]
    fn test_tr005_unknown_reference() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  s:
    resources:
      - id: subscribe
        kind: function
        properties:
          name: subscribe
          handler: bin/main
          runtime: go1.x
          code: { path: main.zip }
          table: { ref: ghost, attr: arn }
"#;
        let errors = validate_project(&parse_project(yaml).unwrap());
        assert!(errors
            .iter()
            .any(|e| e.message.contains("unknown resource 'ghost'")));
    }

    #[test]
    fn test_tr005_duplicate_and_self_reference() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  s:
    resources:
      - id: net
        kind: network
        properties: { cidr: 10.0.0.0/16 }
        depends_on: [net]
      - id: net
        kind: network
        properties: { cidr: 10.1.0.0/16 }
"#;
        let errors = validate_project(&parse_project(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("duplicate")));
        assert!(errors.iter().any(|e| e.message.contains("references itself")));
    }

    #[test]
    fn test_tr005_policy_on_table() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  s:
    resources:
      - id: t
        kind: table
        properties: { name: t, partition_key: { name: PK, type: S } }
        policy:
          - actions: ["dynamodb:*"]
            resources: ["*"]
"#;
        let errors = validate_project(&parse_project(yaml).unwrap());
        assert!(errors
            .iter()
            .any(|e| e.message.contains("cannot carry policy")));
    }

    #[test]
    fn test_tr005_missing_required_property() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  s:
    resources:
      - id: f
        kind: function
        properties: { name: f }
"#;
        let errors = validate_project(&parse_project(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("handler")));
    }

    #[test]
    fn test_tr005_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terrace.yaml");
        std::fs::write(&path, VALID).unwrap();
        let project = parse_project_file(&path).unwrap();
        assert_eq!(project.name, "notisce");
    }

    #[test]
    fn test_tr005_parse_invalid_yaml() {
        assert!(parse_project("not: [valid: yaml: {{").is_err());
    }

    #[test]
    fn test_tr005_stack_name_must_be_path_safe() {
        let yaml = r#"
version: "1.0"
name: x
stacks:
  "../escape":
    resources:
      - id: net
        kind: network
        properties: { cidr: 10.0.0.0/16 }
"#;
        let errors = validate_project(&parse_project(yaml).unwrap());
        assert!(errors
            .iter()
            .any(|e| e.message.contains("invalid stack name '../escape'")));
    }
}
