//! The exploded graph: one node per distinct (program point, state) pair.

use std::collections::HashMap;

use crate::ast::ExprId;
use crate::diagnostics::Span;
use crate::engine::state::StateRef;
use crate::engine::svals::FrameId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramPoint {
    pub frame: FrameId,
    pub expr: ExprId,
    /// Checker that created the node, for error nodes.
    pub tag: Option<&'static str>,
}

impl ProgramPoint {
    pub fn pre_expr(frame: FrameId, expr: ExprId) -> Self {
        Self {
            frame,
            expr,
            tag: None,
        }
    }

    #[must_use]
    pub fn with_tag(self, tag: &'static str) -> Self {
        Self {
            tag: Some(tag),
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExplodedNode {
    pub point: ProgramPoint,
    pub state: StateRef,
    pub span: Span,
    pub pred: Option<NodeId>,
    pub is_error: bool,
}

#[derive(Debug, Default)]
pub struct ExplodedGraph {
    nodes: Vec<ExplodedNode>,
    index: HashMap<(ProgramPoint, StateRef), NodeId>,
}

impl ExplodedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node for `(point, state)`. Returns `None` if an identical node
    /// already exists, i.e. the path caches out.
    pub fn add_node(
        &mut self,
        point: ProgramPoint,
        state: StateRef,
        span: Span,
        pred: Option<NodeId>,
    ) -> Option<NodeId> {
        let key = (point, state);
        if self.index.contains_key(&key) {
            return None;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(ExplodedNode {
            point,
            state: key.1.clone(),
            span,
            pred,
            is_error: point.tag.is_some(),
        });
        self.index.insert(key, id);
        Some(id)
    }

    pub fn node(&self, id: NodeId) -> &ExplodedNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn error_nodes(&self) -> impl Iterator<Item = &ExplodedNode> {
        self.nodes.iter().filter(|n| n.is_error)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::ProgramState;
    use crate::engine::svals::SVal;

    #[test]
    fn identical_nodes_cache_out() {
        let mut graph = ExplodedGraph::new();
        let point = ProgramPoint::pre_expr(FrameId(0), ExprId(1));
        let state = ProgramState::initial();

        let first = graph.add_node(point, state.clone(), Span::default(), None);
        assert!(first.is_some());
        assert!(graph.add_node(point, state.clone(), Span::default(), first).is_none());

        let changed = state.bind_expr(FrameId(0), ExprId(1), SVal::int(3));
        assert!(graph.add_node(point, changed, Span::default(), first).is_some());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn tagged_nodes_are_distinct_error_nodes() {
        let mut graph = ExplodedGraph::new();
        let point = ProgramPoint::pre_expr(FrameId(0), ExprId(1));
        let state = ProgramState::initial();
        let pred = graph.add_node(point, state.clone(), Span::default(), None);
        let error = graph.add_node(point.with_tag("checker"), state, Span::default(), pred);
        assert!(error.is_some());
        assert_eq!(graph.error_nodes().count(), 1);
    }
}
