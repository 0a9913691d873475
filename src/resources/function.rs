//! Function resources and their pre-built code artifacts.

use crate::core::types::{PolicyStatement, ResourceDefinition, ResourceKind, Value};
use crate::tripwire::hasher;
use std::collections::BTreeMap;
use std::path::Path;

/// Upper bound on function timeout, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 900;

/// Reference to a pre-built code package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: String,
    pub checksum: Option<String>,
}

impl Artifact {
    /// Artifact at `path`. The checksum is filled in when the file exists
    /// locally; a missing file is left for the provider to reject.
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let checksum = match hasher::hash_file(Path::new(&path)) {
            Ok(hash) => Some(hash),
            Err(e) => {
                log::debug!("artifact not hashed: {}", e);
                None
            }
        };
        Self { path, checksum }
    }

    /// Conventional location of a route's Go binary package.
    pub fn for_route(route: &str) -> Self {
        Self::from_path(format!("lib/functions/{}/bin/main.zip", route))
    }

    fn to_value(&self) -> Value {
        let mut entries = BTreeMap::new();
        entries.insert("path".to_string(), Value::from(self.path.as_str()));
        if let Some(ref checksum) = self.checksum {
            entries.insert("checksum".to_string(), Value::from(checksum.as_str()));
        }
        Value::Map(entries)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionProps {
    pub name: String,
    pub handler: String,
    pub runtime: String,
    pub code: Artifact,
    pub timeout_secs: u64,
    pub tracing: bool,
}

impl FunctionProps {
    /// Go function with the project's conventions: `bin/main` handler,
    /// one-minute timeout, active tracing.
    pub fn go(name: &str, code: Artifact) -> Self {
        Self {
            name: name.to_string(),
            handler: "bin/main".to_string(),
            runtime: "go1.x".to_string(),
            code,
            timeout_secs: 60,
            tracing: true,
        }
    }

    /// Definition whose execution role is the `arn` output of `role_id`.
    pub fn definition(&self, id: &str, role_id: &str) -> ResourceDefinition {
        ResourceDefinition::new(id, ResourceKind::Function)
            .property("name", self.name.as_str())
            .property("handler", self.handler.as_str())
            .property("runtime", self.runtime.as_str())
            .property("code", self.code.to_value())
            .property("timeout", self.timeout_secs)
            .property("tracing", if self.tracing { "active" } else { "pass_through" })
            .reference("role", role_id, "arn")
    }
}

/// The blanket lambda statement every route function carries.
pub fn invoke_all_statement() -> PolicyStatement {
    PolicyStatement::allow(["lambda:*"], ["*"])
}

pub(crate) fn validate(properties: &BTreeMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(code) = properties.get("code") {
        let has_path = matches!(code, Value::Map(m) if m.get("path").and_then(Value::as_str).is_some());
        if !has_path {
            errors.push("code must be a map with a 'path'".to_string());
        }
    }
    if let Some(timeout) = properties.get("timeout") {
        match timeout {
            Value::Number(n) if n.as_u64().is_some_and(|t| (1..=MAX_TIMEOUT_SECS).contains(&t)) => {}
            _ => errors.push(format!(
                "timeout must be between 1 and {} seconds",
                MAX_TIMEOUT_SECS
            )),
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr006_artifact_checksum_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.zip");
        std::fs::write(&path, b"zip").unwrap();
        let artifact = Artifact::from_path(path.to_string_lossy().to_string());
        assert_eq!(artifact.checksum, Some(hasher::hash_bytes(b"zip")));
    }

    #[test]
    fn test_tr006_artifact_missing_file() {
        let artifact = Artifact::from_path("/nonexistent/bin/main.zip");
        assert!(artifact.checksum.is_none());
    }

    #[test]
    fn test_tr006_go_function_definition() {
        let props = FunctionProps::go("subscribe", Artifact::for_route("subscribe"));
        let def = props.definition("subscribe", "subscribe-role");
        assert_eq!(def.properties["handler"], Value::from("bin/main"));
        assert_eq!(def.properties["timeout"], Value::from(60u64));
        assert_eq!(def.references[0].target, "subscribe-role");
        assert_eq!(def.references[0].attribute, "arn");
        assert!(validate(&def.properties).is_empty());
    }

    #[test]
    fn test_tr006_function_timeout_bounds() {
        let mut p = BTreeMap::new();
        p.insert("timeout".to_string(), Value::from(901u64));
        p.insert("code".to_string(), Value::from("main.zip"));
        assert_eq!(validate(&p).len(), 2);
    }
}
