//! TR-004: Graph builder: declarative definitions in, frozen graph out.
//!
//! Two phases: `define` accumulates records, `build` substitutes templates,
//! assembles nodes, attaches references and statements, validates per-kind
//! requirements and freezes. Nothing here touches a live system.

use super::error::GraphError;
use super::graph::ResourceGraph;
use super::parser::ProjectConfig;
use super::resolver::{self, TemplateContext};
use super::types::{Environment, ResourceDefinition, ResourceNode, Value};
use crate::resources;
use std::collections::BTreeMap;

/// Accumulates resource definitions for one stack.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    stack: String,
    env: Environment,
    params: BTreeMap<String, Value>,
    definitions: Vec<ResourceDefinition>,
}

impl GraphBuilder {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            env: Environment::default(),
            params: BTreeMap::new(),
            definitions: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn define(&mut self, definition: ResourceDefinition) -> &mut Self {
        self.definitions.push(definition);
        self
    }

    pub fn define_all<I>(&mut self, definitions: I) -> &mut Self
    where
        I: IntoIterator<Item = ResourceDefinition>,
    {
        self.definitions.extend(definitions);
        self
    }

    /// Assemble and freeze the graph. The first error aborts the build.
    pub fn build(&self) -> Result<ResourceGraph, GraphError> {
        let ctx = TemplateContext {
            stack: &self.stack,
            env: &self.env,
            params: &self.params,
        };
        let mut graph = ResourceGraph::new(self.stack.clone());

        for def in &self.definitions {
            let mut node = ResourceNode::new(def.id.clone(), def.kind);
            for (key, value) in &def.properties {
                node.properties
                    .insert(key.clone(), resolver::resolve_value(value, &ctx)?);
            }
            graph.add_node(node)?;
        }

        for def in &self.definitions {
            for r in &def.references {
                graph.add_reference(&def.id, &r.property, &r.target, &r.attribute)?;
            }
            for statement in &def.policy {
                let resolved = resolver::resolve_statement(statement, &ctx)?;
                if !graph.add_policy_statement(&def.id, resolved)? {
                    log::debug!("{}: dropped duplicate policy statement", def.id);
                }
            }
            for dep in &def.depends_on {
                graph.add_dependency(&def.id, dep)?;
            }
        }

        for node in graph.nodes() {
            if let Some(message) = resources::validate(node).into_iter().next() {
                return Err(GraphError::Validation {
                    resource: node.id.clone(),
                    message,
                });
            }
        }

        graph.freeze()?;
        log::info!(
            "built stack '{}' ({} resources)",
            graph.stack(),
            graph.len()
        );
        Ok(graph)
    }
}

/// Build one named stack from a parsed project file.
pub fn build_stack(project: &ProjectConfig, stack: &str) -> Result<ResourceGraph, GraphError> {
    let decl = project
        .stacks
        .get(stack)
        .ok_or_else(|| GraphError::UnknownStack(stack.to_string()))?;
    let mut builder = GraphBuilder::new(stack)
        .with_env(project.env.clone())
        .with_params(project.params.clone());
    builder.define_all(decl.resources.iter().cloned());
    builder.build()
}
