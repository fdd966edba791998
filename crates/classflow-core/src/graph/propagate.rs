//! Condensation and type propagation.
//!
//! Two-pass SCC condensation over regular edges, a topological sweep that
//! handles forward edges plus order-respecting cast edges, and a repeated
//! pass over the remaining "bad" cast edges until the fixed point.

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::graph::{ConstraintGraph, NodeId, TypeFlow};
use crate::symbols::{SymbolTable, TypeRef};

#[derive(Debug, Clone, Copy, Default)]
pub struct PropagationStats {
    pub components: usize,
    pub bad_edges: usize,
    pub rounds: usize,
}

/// Propagate reachable types through the graph to a fixed point.
pub fn propagate_types(graph: &mut ConstraintGraph, symbols: &SymbolTable) -> PropagationStats {
    let order = condense(graph);
    let components = order.len();
    for (priority, members) in order.iter().enumerate() {
        for &member in members {
            graph.nodes[member.index()].priority = priority as u32;
        }
    }

    // Topological sweep: forward edges plus cast edges whose source is
    // already final.
    for members in &order {
        if members.len() == 1 && graph.node(members[0]).is_source() {
            continue;
        }
        let priority = graph.node(members[0]).priority;
        let mut gathered: FxHashSet<TypeFlow> = FxHashSet::default();
        for &member in members {
            let node = graph.node(member);
            for &source in &node.in_edges {
                gathered.extend(graph.types(source).iter().copied());
            }
            for &(source, cast) in &node.cast_in {
                if graph.node(source).priority < priority {
                    for &flow in graph.types(source) {
                        if symbols.is_subtype(flow.ty, cast) {
                            gathered.insert(flow);
                        }
                    }
                }
            }
        }
        for &member in members {
            graph.nodes[member.index()].types = gathered.clone();
        }
    }

    // Cast edges that point against topological order were skipped above;
    // replay them until a full round adds nothing.
    let mut bad_edges: Vec<(NodeId, NodeId, TypeRef)> = Vec::new();
    for (index, node) in graph.nodes.iter().enumerate() {
        let source = NodeId(index as u32);
        for &(target, cast) in &node.cast_out {
            if node.priority >= graph.node(target).priority {
                bad_edges.push((source, target, cast));
            }
        }
    }
    bad_edges.sort_by_key(|&(source, target, _)| {
        (graph.node(target).priority, source, target)
    });

    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut changed = false;
        for &(source, target, cast) in &bad_edges {
            let mut pending: Vec<TypeFlow> = graph
                .types(source)
                .iter()
                .copied()
                .filter(|flow| {
                    symbols.is_subtype(flow.ty, cast) && !graph.types(target).contains(flow)
                })
                .collect();
            pending.sort();
            for flow in pending {
                changed = true;
                propagate_single(graph, symbols, target, flow);
            }
        }
        if !changed {
            break;
        }
    }

    let stats = PropagationStats {
        components,
        bad_edges: bad_edges.len(),
        rounds,
    };
    debug!(
        components = stats.components,
        bad_edges = stats.bad_edges,
        rounds = stats.rounds,
        "propagation reached fixed point"
    );
    stats
}

/// Push one type through regular edges unconditionally and through cast
/// edges whose target type admits it.
fn propagate_single(
    graph: &mut ConstraintGraph,
    symbols: &SymbolTable,
    start: NodeId,
    flow: TypeFlow,
) {
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        if !graph.nodes[node.index()].types.insert(flow) {
            continue;
        }
        let out: Vec<NodeId> = graph.node(node).out_edges.clone();
        stack.extend(out);
        let casts: Vec<(NodeId, TypeRef)> = graph.node(node).cast_out.clone();
        for (target, cast) in casts {
            if symbols.is_subtype(flow.ty, cast) {
                stack.push(target);
            }
        }
    }
}

/// Strongly connected components of the regular-edge subgraph, in
/// topological order (sources of the condensation first).
fn condense(graph: &ConstraintGraph) -> Vec<Vec<NodeId>> {
    let n = graph.nodes.len();

    // Pass 1: post-order over forward edges.
    let mut post_order = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    for root in 0..n {
        if visited[root] {
            continue;
        }
        // Iterative DFS; the second stack entry marks "children done".
        let mut stack = vec![(NodeId(root as u32), false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                post_order.push(node);
                continue;
            }
            if visited[node.index()] {
                continue;
            }
            visited[node.index()] = true;
            stack.push((node, true));
            for &next in &graph.node(node).out_edges {
                if !visited[next.index()] {
                    stack.push((next, false));
                }
            }
        }
    }

    // Pass 2: reverse-order DFS over reverse edges paints components.
    let mut component = vec![usize::MAX; n];
    let mut components: Vec<Vec<NodeId>> = Vec::new();
    for &root in post_order.iter().rev() {
        if component[root.index()] != usize::MAX {
            continue;
        }
        let id = components.len();
        let mut members = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if component[node.index()] != usize::MAX {
                continue;
            }
            component[node.index()] = id;
            members.push(node);
            for &previous in &graph.node(node).in_edges {
                if component[previous.index()] == usize::MAX {
                    stack.push(previous);
                }
            }
        }
        components.push(members);
    }

    // Pass 3: topological order of the condensation by DFS over forward
    // component edges.
    let count = components.len();
    let mut adjacency: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); count];
    for (index, node) in graph.nodes.iter().enumerate() {
        let from = component[index];
        for &target in &node.out_edges {
            let to = component[target.index()];
            if from != to {
                adjacency[from].insert(to);
            }
        }
    }
    let adjacency: Vec<Vec<usize>> = adjacency
        .into_iter()
        .map(|set| {
            let mut list: Vec<usize> = set.into_iter().collect();
            list.sort_unstable();
            list
        })
        .collect();

    let mut topo = Vec::with_capacity(count);
    let mut visited = vec![false; count];
    for root in 0..count {
        if visited[root] {
            continue;
        }
        let mut stack = vec![(root, false)];
        while let Some((comp, expanded)) = stack.pop() {
            if expanded {
                topo.push(comp);
                continue;
            }
            if visited[comp] {
                continue;
            }
            visited[comp] = true;
            stack.push((comp, true));
            for &next in &adjacency[comp] {
                if !visited[next] {
                    stack.push((next, false));
                }
            }
        }
    }
    topo.reverse();

    let mut ordered = Vec::with_capacity(count);
    for comp in topo {
        ordered.push(std::mem::take(&mut components[comp]));
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::symbols::SymbolTable;

    fn source(graph: &mut ConstraintGraph, ty: TypeRef, is_virtual: bool) -> NodeId {
        graph.add_node(NodeKind::Source(TypeFlow { ty, is_virtual }))
    }

    fn table_with_hierarchy() -> (SymbolTable, TypeRef, TypeRef, TypeRef) {
        // animal <- cat, dog
        let mut symbols = SymbolTable::new();
        let module = symbols.register_module("m".into(), 0);
        let (animal, _) = symbols.declare_type("Animal".into(), true, module);
        let (cat, _) = symbols.declare_type("Cat".into(), true, module);
        let (dog, _) = symbols.declare_type("Dog".into(), true, module);
        symbols.fill_type(animal, false, false, vec![], vec![], vec![], None);
        symbols.fill_type(cat, true, false, vec![animal], vec![], vec![], None);
        symbols.fill_type(dog, true, false, vec![animal], vec![], vec![], None);
        (symbols, animal, cat, dog)
    }

    #[test]
    fn test_forward_propagation_reaches_sinks() {
        let (symbols, _, cat, _) = table_with_hierarchy();
        let mut graph = ConstraintGraph::new();
        let s = source(&mut graph, cat, false);
        let a = graph.add_ordinary();
        let b = graph.add_ordinary();
        graph.add_edge(s, a);
        graph.add_edge(a, b);

        propagate_types(&mut graph, &symbols);
        assert!(graph.types(b).contains(&TypeFlow {
            ty: cat,
            is_virtual: false
        }));
    }

    #[test]
    fn test_cast_edge_filters_types() {
        let (symbols, animal, cat, dog) = table_with_hierarchy();
        let mut graph = ConstraintGraph::new();
        let s_cat = source(&mut graph, cat, false);
        let s_dog = source(&mut graph, dog, false);
        let join = graph.add_ordinary();
        graph.add_edge(s_cat, join);
        graph.add_edge(s_dog, join);

        // join --(as Cat)--> narrowed
        let narrowed = graph.add_ordinary();
        graph.add_cast_edge(join, narrowed, cat);
        // and an unrelated widening cast keeps both
        let widened = graph.add_ordinary();
        graph.add_cast_edge(join, widened, animal);

        propagate_types(&mut graph, &symbols);
        let cat_flow = TypeFlow {
            ty: cat,
            is_virtual: false,
        };
        let dog_flow = TypeFlow {
            ty: dog,
            is_virtual: false,
        };
        assert!(graph.types(narrowed).contains(&cat_flow));
        assert!(!graph.types(narrowed).contains(&dog_flow));
        assert!(graph.types(widened).contains(&cat_flow));
        assert!(graph.types(widened).contains(&dog_flow));
    }

    #[test]
    fn test_cycle_members_share_types() {
        let (symbols, _, cat, dog) = table_with_hierarchy();
        let mut graph = ConstraintGraph::new();
        let s_cat = source(&mut graph, cat, false);
        let s_dog = source(&mut graph, dog, false);
        let a = graph.add_ordinary();
        let b = graph.add_ordinary();
        let c = graph.add_ordinary();
        graph.add_edge(s_cat, a);
        graph.add_edge(a, b);
        graph.add_edge(b, c);
        graph.add_edge(c, a);
        graph.add_edge(s_dog, c);

        propagate_types(&mut graph, &symbols);
        for node in [a, b, c] {
            assert_eq!(graph.types(node).len(), 2, "node {node:?}");
        }
    }

    #[test]
    fn test_backward_cast_edge_reaches_fixed_point() {
        let (symbols, animal, cat, _) = table_with_hierarchy();
        let mut graph = ConstraintGraph::new();

        // A cycle fed late by a source, with a cast edge leaving the cycle
        // against topological order.
        let late = graph.add_ordinary();
        let early = graph.add_ordinary();
        graph.add_cast_edge(late, early, animal);
        let s_cat = source(&mut graph, cat, false);
        graph.add_edge(s_cat, late);

        propagate_types(&mut graph, &symbols);
        assert!(graph.types(early).contains(&TypeFlow {
            ty: cat,
            is_virtual: false
        }));
    }
}
