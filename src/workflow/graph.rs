// StateGraph - Stage and edge management for the generation pipeline
use super::executor::ExecutorConfig;
use super::progress::ProgressReporter;
use super::router::RouterFunction;
use super::state::{StateUpdate, TaskState};
use crate::error::{PipelineError, Result};
use crate::services::Services;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a stage may use besides the task state itself.
pub struct RunContext<'a> {
    pub services: &'a Services,
    pub config: &'a ExecutorConfig,
    pub cancel: &'a CancellationToken,
    pub progress: &'a ProgressReporter,
}

/// Stage function - reads the state, returns a partial update
#[async_trait]
pub trait NodeFunction: Send + Sync {
    async fn execute(&self, state: &TaskState, ctx: &RunContext<'_>) -> Result<StateUpdate>;
}

/// Node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// Entry point
    Start,
    /// Single sequential call to a collaborator
    Stage,
    /// Concurrent unit tasks joined by a barrier
    FanOut,
    /// Folds a fan-out round back into the scenes
    Aggregate,
    /// Last stage on the success path
    End,
}

/// Edge types
#[derive(Clone)]
pub enum EdgeType {
    /// Fixed edge (always follows this path)
    Fixed(String),
    /// Router decides; `targets` lists every node it may return
    Conditional {
        router: RouterFunction,
        targets: Vec<String>,
    },
}

impl std::fmt::Debug for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeType::Fixed(target) => write!(f, "Fixed({})", target),
            EdgeType::Conditional { targets, .. } => write!(f, "Conditional(<router> -> {:?})", targets),
        }
    }
}

/// Graph node
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    pub function: Arc<dyn NodeFunction>,
    pub description: String,
}

/// StateGraph - The stage graph
pub struct StateGraph {
    /// All nodes in the graph
    nodes: HashMap<String, Node>,

    /// Edges: node_id -> EdgeType
    edges: HashMap<String, EdgeType>,

    /// Entry point node
    entry_point: Option<String>,

    /// Compiled flag
    compiled: bool,
}

impl StateGraph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry_point: None,
            compiled: false,
        }
    }

    fn ensure_mutable(&self, what: &str) -> bool {
        if self.compiled {
            tracing::warn!("Ignoring {} on compiled graph", what);
        }
        !self.compiled
    }

    /// Add node to graph
    pub fn add_node(
        &mut self,
        id: String,
        node_type: NodeType,
        function: Arc<dyn NodeFunction>,
        description: String,
    ) -> &mut Self {
        if self.ensure_mutable("add_node") {
            let node = Node {
                id: id.clone(),
                node_type,
                function,
                description,
            };
            self.nodes.insert(id, node);
        }
        self
    }

    /// Add fixed edge
    pub fn add_edge(&mut self, from: String, to: String) -> &mut Self {
        if self.ensure_mutable("add_edge") {
            self.edges.insert(from, EdgeType::Fixed(to));
        }
        self
    }

    /// Add conditional edge with router
    pub fn add_conditional_edge(&mut self, from: String, router: RouterFunction, targets: Vec<String>) -> &mut Self {
        if self.ensure_mutable("add_conditional_edge") {
            self.edges.insert(from, EdgeType::Conditional { router, targets });
        }
        self
    }

    /// Set entry point
    pub fn set_entry_point(&mut self, node_id: String) -> &mut Self {
        if self.ensure_mutable("set_entry_point") {
            self.entry_point = Some(node_id);
        }
        self
    }

    /// Compile graph (validate)
    pub fn compile(&mut self) -> Result<()> {
        let entry = self
            .entry_point
            .as_ref()
            .ok_or_else(|| PipelineError::Graph("No entry point set".to_string()))?;
        if !self.nodes.contains_key(entry) {
            return Err(PipelineError::Graph(format!("Entry point node '{}' does not exist", entry)));
        }

        // Validate all edges point to existing nodes
        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(PipelineError::Graph(format!("Edge from non-existent node: {}", from)));
            }

            let targets: &[String] = match edge {
                EdgeType::Fixed(to) => std::slice::from_ref(to),
                EdgeType::Conditional { targets, .. } => targets,
            };
            for target in targets {
                if !self.nodes.contains_key(target) {
                    return Err(PipelineError::Graph(format!("Edge {} -> non-existent node: {}", from, target)));
                }
            }
        }

        if self.has_cycles() {
            tracing::warn!("Graph contains cycles - execution is bounded only by max_iterations");
        }

        self.compiled = true;
        tracing::info!(
            "✅ StateGraph compiled successfully: {} nodes, {} edges",
            self.nodes.len(),
            self.edges.len()
        );

        Ok(())
    }

    /// Check for cycles using DFS
    fn has_cycles(&self) -> bool {
        let mut visited = HashMap::new();
        let mut rec_stack = HashMap::new();

        for node_id in self.nodes.keys() {
            if self.dfs_cycle_check(node_id, &mut visited, &mut rec_stack) {
                return true;
            }
        }

        false
    }

    fn dfs_cycle_check(
        &self,
        node: &str,
        visited: &mut HashMap<String, bool>,
        rec_stack: &mut HashMap<String, bool>,
    ) -> bool {
        visited.insert(node.to_string(), true);
        rec_stack.insert(node.to_string(), true);

        if let Some(edge) = self.edges.get(node) {
            let targets = match edge {
                EdgeType::Fixed(target) => vec![target.clone()],
                EdgeType::Conditional { targets, .. } => targets.clone(),
            };

            for target in targets {
                if !visited.get(&target).unwrap_or(&false) {
                    if self.dfs_cycle_check(&target, visited, rec_stack) {
                        return true;
                    }
                } else if *rec_stack.get(&target).unwrap_or(&false) {
                    return true;
                }
            }
        }

        rec_stack.insert(node.to_string(), false);
        false
    }

    /// Next node for the current state; `None` means the graph ends here.
    pub fn get_next_node(&self, current_node: &str, state: &TaskState) -> Option<String> {
        match self.edges.get(current_node) {
            Some(EdgeType::Fixed(target)) => Some(target.clone()),
            Some(EdgeType::Conditional { router, targets }) => {
                let next = router(state)?;
                if targets.contains(&next) {
                    Some(next)
                } else {
                    tracing::error!("Router on '{}' chose undeclared node '{}'", current_node, next);
                    None
                }
            }
            None => None,
        }
    }

    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn get_entry_point(&self) -> Option<&String> {
        self.entry_point.as_ref()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn get_node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder pattern for StateGraph
pub struct StateGraphBuilder {
    graph: StateGraph,
}

impl StateGraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: StateGraph::new(),
        }
    }

    pub fn add_node(mut self, id: &str, node_type: NodeType, function: Arc<dyn NodeFunction>, description: &str) -> Self {
        self.graph
            .add_node(id.to_string(), node_type, function, description.to_string());
        self
    }

    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.graph.add_edge(from.to_string(), to.to_string());
        self
    }

    pub fn add_conditional_edge(mut self, from: &str, router: RouterFunction, targets: &[&str]) -> Self {
        self.graph.add_conditional_edge(
            from.to_string(),
            router,
            targets.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn set_entry_point(mut self, node_id: &str) -> Self {
        self.graph.set_entry_point(node_id.to_string());
        self
    }

    pub fn build(mut self) -> Result<StateGraph> {
        self.graph.compile()?;
        Ok(self.graph)
    }
}

impl Default for StateGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
