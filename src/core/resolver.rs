//! TR-003: Template resolution and deterministic topological ordering.
//!
//! Resolves `{{params.key}}`, `{{env.account}}`, `{{env.region}}` and
//! `{{stack.name}}` inside string values. Orders nodes with Kahn's
//! algorithm; the ready set is kept sorted so ties always go to the
//! smallest id.

use super::error::GraphError;
use super::types::{Environment, PolicyStatement, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Variables available to templates while building one stack.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub stack: &'a str,
    pub env: &'a Environment,
    pub params: &'a BTreeMap<String, Value>,
}

/// Render a parameter value as template text.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Ref(r) => r.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Resolve all template variables in a string.
pub fn resolve_template(template: &str, ctx: &TemplateContext) -> Result<String, GraphError> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| GraphError::Template(format!("unclosed template in '{}'", template)))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(param) = key.strip_prefix("params.") {
            ctx.params
                .get(param)
                .map(value_to_string)
                .ok_or_else(|| GraphError::Template(format!("unknown param: {}", param)))?
        } else {
            match key {
                "env.account" => ctx.env.account.clone(),
                "env.region" => ctx.env.region.clone(),
                "stack.name" => ctx.stack.to_string(),
                _ => {
                    return Err(GraphError::Template(format!(
                        "unknown template variable: {}",
                        key
                    )))
                }
            }
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates in every string nested inside a value.
pub fn resolve_value(value: &Value, ctx: &TemplateContext) -> Result<Value, GraphError> {
    Ok(match value {
        Value::String(s) => Value::String(resolve_template(s, ctx)?),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|v| resolve_value(v, ctx))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), resolve_value(v, ctx)?)))
                .collect::<Result<_, GraphError>>()?,
        ),
        other => other.clone(),
    })
}

/// Resolve templates in a statement's resource patterns.
pub fn resolve_statement(
    statement: &PolicyStatement,
    ctx: &TemplateContext,
) -> Result<PolicyStatement, GraphError> {
    Ok(PolicyStatement {
        effect: statement.effect,
        actions: statement.actions.clone(),
        resources: statement
            .resources
            .iter()
            .map(|v| resolve_value(v, ctx))
            .collect::<Result<_, _>>()?,
    })
}

/// Topological order over `(id, dependencies)` pairs: every dependency
/// precedes its dependents. Dependencies outside the node set are ignored.
pub fn topological_order<'a, I>(nodes: I) -> Result<Vec<String>, GraphError>
where
    I: IntoIterator<Item = (&'a str, Vec<&'a str>)>,
{
    let nodes: Vec<(&str, Vec<&str>)> = nodes.into_iter().collect();
    let known: BTreeSet<&str> = nodes.iter().map(|(id, _)| *id).collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (id, deps) in &nodes {
        let id: &str = id;
        in_degree.entry(id).or_insert(0);
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for dep in deps.iter().copied().filter(|d| known.contains(d)) {
            if !seen.insert(dep) {
                continue;
            }
            dependents.entry(dep).or_default().push(id);
            *in_degree.entry(id).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(known.len());
    while let Some(current) = ready.pop_first() {
        order.push(current.to_string());
        for dependent in dependents.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() != known.len() {
        let ordered: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let cycle = known
            .difference(&ordered)
            .map(|s| s.to_string())
            .collect();
        return Err(GraphError::CyclicReference { cycle });
    }

    Ok(order)
}
