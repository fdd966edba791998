//! Whole-program constraint graph.
//!
//! Nodes live in one arena and reference each other by [`NodeId`]; adjacency
//! is kept in plain vectors, forward and reverse, with cast edges stored
//! separately since condensation only follows regular edges.

mod build;
mod propagate;

pub use build::{build_constraint_graph, collect_instantiated, select_roots};
pub use propagate::{propagate_types, PropagationStats};

use rustc_hash::FxHashSet;

use crate::symbols::{FunRef, TypeRef};
use crate::template::CallSiteRef;

/// Index of a constraint-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A type observed at a node. `is_virtual` marks the top of a hierarchy whose
/// runtime class was never witnessed; such receivers never devirtualize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeFlow {
    pub ty: TypeRef,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Nullary origin of a single type.
    Source(TypeFlow),
    /// Join point; its types are the union of its incoming edges.
    Ordinary,
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub out_edges: Vec<NodeId>,
    pub in_edges: Vec<NodeId>,
    pub cast_out: Vec<(NodeId, TypeRef)>,
    pub cast_in: Vec<(NodeId, TypeRef)>,
    pub types: FxHashSet<TypeFlow>,
    /// Topological priority of the owning strongly connected component.
    pub priority: u32,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        let mut types = FxHashSet::default();
        if let NodeKind::Source(flow) = kind {
            types.insert(flow);
        }
        Self {
            kind,
            out_edges: Vec::new(),
            in_edges: Vec::new(),
            cast_out: Vec::new(),
            cast_in: Vec::new(),
            types,
            priority: 0,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, NodeKind::Source(_))
    }
}

/// Parameter and return nodes of one linked function.
#[derive(Debug, Clone)]
pub struct FunctionFlow {
    pub parameters: Vec<NodeId>,
    pub returns: NodeId,
    /// A template exists; without one the returns node is a synthetic source
    /// of the declared return type and arguments dangle.
    pub has_template: bool,
}

/// A virtual call remembered for the devirtualizer.
#[derive(Debug, Clone)]
pub struct VirtualCallSite {
    pub call_site: CallSiteRef,
    /// The casted-receiver node whose fixed-point types decide the outcome.
    pub receiver: NodeId,
    /// `(receiver class, concrete callee)` for every instantiated candidate.
    pub callees: Vec<(TypeRef, FunRef)>,
}

#[derive(Debug)]
pub struct ConstraintGraph {
    pub nodes: Vec<Node>,
    pub virtual_call_sites: Vec<VirtualCallSite>,
}

impl Default for ConstraintGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintGraph {
    pub fn new() -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            virtual_call_sites: Vec::new(),
        };
        // The void sink occupies index 0.
        graph.add_node(NodeKind::Ordinary);
        graph
    }

    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind));
        id
    }

    pub fn add_ordinary(&mut self) -> NodeId {
        self.add_node(NodeKind::Ordinary)
    }

    pub fn add_source(&mut self, flow: TypeFlow) -> NodeId {
        self.add_node(NodeKind::Source(flow))
    }

    /// Sink for values whose types are discarded.
    pub fn void_node(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn types(&self, id: NodeId) -> &FxHashSet<TypeFlow> {
        &self.nodes[id.index()].types
    }

    /// Unconditional subset edge `types(to) ⊇ types(from)`.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if from == to || self.nodes[from.index()].out_edges.contains(&to) {
            return;
        }
        self.nodes[from.index()].out_edges.push(to);
        self.nodes[to.index()].in_edges.push(from);
    }

    /// Filtered subset edge: only subtypes of `cast` flow across.
    pub fn add_cast_edge(&mut self, from: NodeId, to: NodeId, cast: TypeRef) {
        if self.nodes[from.index()]
            .cast_out
            .contains(&(to, cast))
        {
            return;
        }
        self.nodes[from.index()].cast_out.push((to, cast));
        self.nodes[to.index()].cast_in.push((from, cast));
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.out_edges.len() + n.cast_out.len())
            .sum()
    }
}
