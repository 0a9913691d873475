//! TR-002: Resource graph: the mutable → frozen container of nodes.
//!
//! Mutators work until `freeze()`; freezing validates reference targets
//! and rejects cycles, after which every mutator fails with `GraphFrozen`.

use super::error::GraphError;
use super::resolver;
use super::types::{PolicyStatement, Reference, ResourceNode, Value};
use indexmap::IndexMap;
use std::collections::HashMap;

/// All nodes of one stack. Node order is declaration order.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    stack: String,
    nodes: IndexMap<String, ResourceNode>,
    frozen: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

impl ResourceGraph {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            nodes: IndexMap::new(),
            frozen: false,
        }
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    fn ensure_mutable(&self) -> Result<(), GraphError> {
        if self.frozen {
            return Err(GraphError::GraphFrozen(self.stack.clone()));
        }
        Ok(())
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut ResourceNode, GraphError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownResource(id.to_string()))
    }

    /// Add a node; ids are unique within a graph.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<(), GraphError> {
        self.ensure_mutable()?;
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateResource(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Append a policy statement. Returns `false` when an identical
    /// statement is already attached.
    pub fn add_policy_statement(
        &mut self,
        node_id: &str,
        statement: PolicyStatement,
    ) -> Result<bool, GraphError> {
        self.ensure_mutable()?;
        let node = self.node_mut(node_id)?;
        if !node.kind.accepts_policy() {
            return Err(GraphError::PolicyNotAllowed {
                resource: node_id.to_string(),
                kind: node.kind.to_string(),
            });
        }
        if node.policy.contains(&statement) {
            return Ok(false);
        }
        node.policy.push(statement);
        Ok(true)
    }

    /// Point `property` of `from` at `attribute` of `to`. The target only has
    /// to exist by the time the graph is frozen.
    pub fn add_reference(
        &mut self,
        from: &str,
        property: &str,
        to: &str,
        attribute: &str,
    ) -> Result<(), GraphError> {
        self.ensure_mutable()?;
        let node = self.node_mut(from)?;
        node.properties.insert(
            property.to_string(),
            Value::Ref(Reference::new(to, attribute)),
        );
        Ok(())
    }

    /// Record an ordering-only dependency (no value flows between the nodes).
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        self.ensure_mutable()?;
        let node = self.node_mut(from)?;
        if !node.depends_on.iter().any(|d| d == to) {
            node.depends_on.push(to.to_string());
        }
        Ok(())
    }

    /// Validate targets and acyclicity, then make the graph immutable.
    pub fn freeze(&mut self) -> Result<(), GraphError> {
        self.ensure_mutable()?;
        self.check_targets()?;
        if let Some(cycle) = self.find_cycle() {
            return Err(GraphError::CyclicReference { cycle });
        }
        self.frozen = true;
        log::debug!("froze stack '{}' with {} nodes", self.stack, self.nodes.len());
        Ok(())
    }

    fn check_targets(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for (property, reference) in node.reference_sites() {
                if !self.nodes.contains_key(&reference.target) {
                    return Err(GraphError::UnknownTarget {
                        from: node.id.clone(),
                        property: property.to_string(),
                        target: reference.target.clone(),
                    });
                }
            }
            for dep in &node.depends_on {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownTarget {
                        from: node.id.clone(),
                        property: "depends_on".to_string(),
                        target: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Depth-first search with recursion-stack marking. A back edge to a
    /// node on the stack yields the cycle path, first node repeated last.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();

        let mut roots: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        roots.sort_unstable();

        for root in roots {
            if marks.contains_key(root) {
                continue;
            }
            if let Some(cycle) = self.visit(root, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(id, Mark::OnStack);
        stack.push(id);

        let deps = self.nodes.get(id).map(ResourceNode::dependencies).unwrap_or_default();
        for dep in deps {
            match marks.get(dep) {
                Some(Mark::OnStack) => {
                    let start = stack.iter().position(|s| *s == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = self.visit(dep, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    /// Dependencies-first order with ties broken by id.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        resolver::topological_order(
            self.nodes
                .values()
                .map(|n| (n.id.as_str(), n.dependencies())),
        )
    }
}
