//! REST API endpoints: the API itself, keys, usage plans, resources and
//! methods. All share the `endpoint` kind and differ by `endpoint_type`.

use crate::core::types::{ResourceDefinition, ResourceKind, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    RestApi,
    ApiKey,
    UsagePlan,
    Resource,
    Method,
}

impl EndpointType {
    pub const ALL: [EndpointType; 5] = [
        Self::RestApi,
        Self::ApiKey,
        Self::UsagePlan,
        Self::Resource,
        Self::Method,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestApi => "rest_api",
            Self::ApiKey => "api_key",
            Self::UsagePlan => "usage_plan",
            Self::Resource => "resource",
            Self::Method => "method",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// Where API Gateway reads the key from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeySource {
    Header,
    Authorizer,
}

impl ApiKeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "HEADER",
            Self::Authorizer => "AUTHORIZER",
        }
    }
}

const HTTP_METHODS: &[&str] = &["ANY", "DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];

/// Stage the default deployment publishes to.
pub const DEFAULT_STAGE: &str = "prod";

fn endpoint(id: &str, endpoint_type: EndpointType) -> ResourceDefinition {
    ResourceDefinition::new(id, ResourceKind::Endpoint)
        .property("endpoint_type", endpoint_type.as_str())
}

pub fn rest_api(id: &str, name: &str, key_source: ApiKeySource) -> ResourceDefinition {
    endpoint(id, EndpointType::RestApi)
        .property("name", name)
        .property("api_key_source", key_source.as_str())
        .property("stage", DEFAULT_STAGE)
}

pub fn api_key(id: &str, name: &str, api_id: &str) -> ResourceDefinition {
    endpoint(id, EndpointType::ApiKey)
        .property("name", name)
        .property("enabled", true)
        .depends_on(api_id)
}

/// Usage plan bound to the API's deployment stage and one key.
pub fn usage_plan(id: &str, api_id: &str, key_id: &str) -> ResourceDefinition {
    endpoint(id, EndpointType::UsagePlan)
        .property("stage", DEFAULT_STAGE)
        .reference("api_id", api_id, "id")
        .reference("api_key_id", key_id, "id")
}

/// Path segment directly under the API root.
pub fn resource(id: &str, api_id: &str, path_part: &str) -> ResourceDefinition {
    endpoint(id, EndpointType::Resource)
        .property("path_part", path_part)
        .reference("api_id", api_id, "id")
        .reference("parent_id", api_id, "root_resource_id")
}

/// Method on `resource_id` proxied to the function `function_id`.
pub fn lambda_method(
    id: &str,
    api_id: &str,
    resource_id: &str,
    http_method: &str,
    function_id: &str,
) -> ResourceDefinition {
    endpoint(id, EndpointType::Method)
        .property("http_method", http_method)
        .property("integration", "lambda_proxy")
        .property("api_key_required", true)
        .reference("api_id", api_id, "id")
        .reference("resource_id", resource_id, "id")
        .reference("function_arn", function_id, "arn")
}

/// Mock `OPTIONS` method answering CORS preflight for `allowed_origin`.
pub fn cors_options(id: &str, api_id: &str, resource_id: &str, allowed_origin: &str) -> ResourceDefinition {
    let headers = Value::map([
        (
            "Access-Control-Allow-Headers",
            "'Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token,X-Amz-User-Agent'".to_string(),
        ),
        ("Access-Control-Allow-Origin", format!("'{}'", allowed_origin)),
        ("Access-Control-Allow-Credentials", "'false'".to_string()),
        (
            "Access-Control-Allow-Methods",
            "'OPTIONS,GET,PUT,POST,DELETE'".to_string(),
        ),
    ]);
    endpoint(id, EndpointType::Method)
        .property("http_method", "OPTIONS")
        .property("integration", "mock")
        .property("passthrough_behavior", "NEVER")
        .property("response_headers", headers)
        .property(
            "request_templates",
            Value::map([("application/json", "{\"statusCode\": 200}")]),
        )
        .reference("api_id", api_id, "id")
        .reference("resource_id", resource_id, "id")
}

pub(crate) fn validate(properties: &BTreeMap<String, Value>) -> Vec<String> {
    let Some(raw) = properties.get("endpoint_type") else {
        return Vec::new();
    };
    let Some(endpoint_type) = raw.as_str().and_then(EndpointType::parse) else {
        let names: Vec<&str> = EndpointType::ALL.iter().map(EndpointType::as_str).collect();
        return vec![format!("endpoint_type must be one of {}", names.join(", "))];
    };

    let mut errors = Vec::new();
    match endpoint_type {
        EndpointType::Method => match properties.get("http_method").and_then(Value::as_str) {
            Some(m) if HTTP_METHODS.contains(&m) => {}
            Some(m) => errors.push(format!("unsupported http_method '{}'", m)),
            None => errors.push("method needs an http_method".to_string()),
        },
        EndpointType::Resource => {
            let ok = properties
                .get("path_part")
                .and_then(Value::as_str)
                .is_some_and(|p| !p.is_empty() && !p.contains('/'));
            if !ok {
                errors.push("resource needs a single path_part segment".to_string());
            }
        }
        EndpointType::RestApi => {
            if let Some(source) = properties.get("api_key_source") {
                if !matches!(source.as_str(), Some("HEADER" | "AUTHORIZER")) {
                    errors.push("api_key_source must be HEADER or AUTHORIZER".to_string());
                }
            }
        }
        EndpointType::ApiKey | EndpointType::UsagePlan => {}
    }
    errors
}
