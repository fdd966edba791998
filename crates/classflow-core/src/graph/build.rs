//! Constraint graph construction, root selection and the instantiation
//! scan.
//!
//! Functions are linked on demand from the root set: creating a function's
//! flow enqueues its template, templates wire their nodes, and virtual calls
//! expand against the instantiation set. Template-less callees collapse to a
//! synthetic source of their declared return type.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::errors::{AnalysisError, Result};
use crate::graph::{ConstraintGraph, FunctionFlow, NodeId, TypeFlow, VirtualCallSite};
use crate::symbols::{FieldRef, FunRef, SymbolTable, TypeRef};
use crate::template::{CallSiteRef, FunctionTemplate, TemplateEdge, TemplateNode, TemplateNodeId};

/// The program-wide set of possibly-instantiated classes: every
/// `NewObject` result, every singleton, and the string class.
pub fn collect_instantiated(
    symbols: &SymbolTable,
    templates: &FxHashMap<FunRef, FunctionTemplate>,
) -> Vec<TypeRef> {
    let mut set = FxHashSet::default();
    for template in templates.values() {
        for node in &template.nodes {
            match node {
                TemplateNode::NewObject { result_type, .. } => {
                    set.insert(*result_type);
                }
                TemplateNode::Singleton { ty } => {
                    set.insert(*ty);
                }
                _ => {}
            }
        }
    }
    if let Some(string) = symbols.string_type() {
        set.insert(string);
    }
    let mut sorted: Vec<TypeRef> = set.into_iter().collect();
    sorted.sort();
    debug!(classes = sorted.len(), "instantiation set collected");
    sorted
}

/// Entry functions the interprocedural analysis grows from: the
/// program entry point, or every exported concrete function of a library.
/// Field initializer templates run at program start and are always rooted.
pub fn select_roots(
    symbols: &SymbolTable,
    main: Option<FunRef>,
    templates: &FxHashMap<FunRef, FunctionTemplate>,
) -> Vec<FunRef> {
    let mut roots = Vec::new();
    match main {
        Some(main) => roots.push(main),
        None => {
            let mut exported: Vec<FunRef> = templates
                .keys()
                .copied()
                .filter(|&f| {
                    let entry = symbols.function_entry(f);
                    entry.kind.is_declared()
                        && entry.is_exported
                        && !entry.is_abstract
                        && !entry.is_fake_override
                })
                .collect();
            exported.sort();
            roots.extend(exported);
        }
    }
    let mut initializers: Vec<FunRef> = templates
        .keys()
        .copied()
        .filter(|&f| symbols.function_entry(f).is_field_initializer)
        .collect();
    initializers.sort();
    roots.extend(initializers);
    roots
}

/// Link templates into one constraint graph, growing from `roots`.
pub fn build_constraint_graph(
    symbols: &SymbolTable,
    templates: &FxHashMap<FunRef, FunctionTemplate>,
    instantiated: &[TypeRef],
    roots: &[FunRef],
) -> Result<ConstraintGraph> {
    let mut builder = GraphBuilder {
        symbols,
        templates,
        instantiated,
        graph: ConstraintGraph::new(),
        flows: FxHashMap::default(),
        concrete_sources: FxHashMap::default(),
        virtual_sources: FxHashMap::default(),
        field_nodes: FxHashMap::default(),
        queue: VecDeque::new(),
        processed: FxHashSet::default(),
    };
    builder.seed_roots(roots);
    builder.run()?;
    debug!(
        nodes = builder.graph.node_count(),
        edges = builder.graph.edge_count(),
        virtual_calls = builder.graph.virtual_call_sites.len(),
        "constraint graph built"
    );
    Ok(builder.graph)
}

struct GraphBuilder<'a> {
    symbols: &'a SymbolTable,
    templates: &'a FxHashMap<FunRef, FunctionTemplate>,
    instantiated: &'a [TypeRef],
    graph: ConstraintGraph,
    flows: FxHashMap<FunRef, FunctionFlow>,
    concrete_sources: FxHashMap<TypeRef, NodeId>,
    virtual_sources: FxHashMap<TypeRef, NodeId>,
    field_nodes: FxHashMap<FieldRef, NodeId>,
    queue: VecDeque<FunRef>,
    processed: FxHashSet<FunRef>,
}

impl GraphBuilder<'_> {
    /// `CONCRETE` unless the class is abstract (or the virtual sentinel).
    fn concrete_flow(&self, ty: TypeRef) -> TypeFlow {
        let entry = self.symbols.type_entry(ty);
        TypeFlow {
            ty,
            is_virtual: ty == self.symbols.virtual_type() || entry.is_abstract,
        }
    }

    /// `VIRTUAL` unless the class is final: a final class's only runtime
    /// class is itself.
    fn virtual_flow(&self, ty: TypeRef) -> TypeFlow {
        let entry = self.symbols.type_entry(ty);
        TypeFlow {
            ty,
            is_virtual: !entry.is_final,
        }
    }

    fn concrete_source(&mut self, ty: TypeRef) -> NodeId {
        if let Some(&node) = self.concrete_sources.get(&ty) {
            return node;
        }
        let flow = self.concrete_flow(ty);
        let node = self.graph.add_source(flow);
        self.concrete_sources.insert(ty, node);
        node
    }

    fn virtual_source(&mut self, ty: TypeRef) -> NodeId {
        if let Some(&node) = self.virtual_sources.get(&ty) {
            return node;
        }
        let flow = self.virtual_flow(ty);
        let node = self.graph.add_source(flow);
        self.virtual_sources.insert(ty, node);
        node
    }

    /// One ordinary node per field across the whole program.
    fn field_node(&mut self, field: FieldRef) -> NodeId {
        if let Some(&node) = self.field_nodes.get(&field) {
            return node;
        }
        let node = self.graph.add_ordinary();
        self.field_nodes.insert(field, node);
        node
    }

    /// Parameter and returns nodes of a function, created on first use.
    /// Enqueues the function's template for processing.
    fn flow(&mut self, function: FunRef) -> FunctionFlow {
        if let Some(flow) = self.flows.get(&function) {
            return flow.clone();
        }
        let entry = self.symbols.function_entry(function);
        let has_template = self.templates.contains_key(&function);
        let parameter_count = entry.parameter_types.len() + usize::from(entry.is_suspend);
        let parameters = (0..parameter_count)
            .map(|_| self.graph.add_ordinary())
            .collect();
        let returns = if has_template {
            self.graph.add_ordinary()
        } else {
            // Unknown boundary: a synthetic value of the declared return
            // type, virtual when that type is.
            let ty = entry.return_type;
            self.concrete_source(ty)
        };
        let flow = FunctionFlow {
            parameters,
            returns,
            has_template,
        };
        self.flows.insert(function, flow.clone());
        if has_template {
            self.queue.push_back(function);
        }
        flow
    }

    fn seed_roots(&mut self, roots: &[FunRef]) {
        for &root in roots {
            let flow = self.flow(root);
            let entry = self.symbols.function_entry(root);
            let parameter_types = entry.parameter_types.clone();
            for (index, ty) in parameter_types.into_iter().enumerate() {
                let source = self.virtual_source(ty);
                self.graph.add_edge(source, flow.parameters[index]);
            }
        }
    }

    fn run(&mut self) -> Result<()> {
        while let Some(function) = self.queue.pop_front() {
            if !self.processed.insert(function) {
                continue;
            }
            let template = &self.templates[&function];
            self.process_template(function, template)?;
        }
        Ok(())
    }

    fn process_template(&mut self, function: FunRef, template: &FunctionTemplate) -> Result<()> {
        let flow = self.flow(function);
        let entity = self.symbols.function_name(function).to_string();

        // First pass materializes a graph node per template node; template
        // graphs can be cyclic through variables, so wiring waits.
        let mut node_map = Vec::with_capacity(template.nodes.len());
        for (index, node) in template.nodes.iter().enumerate() {
            let id = if index == template.returns.index() {
                flow.returns
            } else {
                self.create_node(&flow, node, &entity)?
            };
            node_map.push(id);
        }

        for (index, node) in template.nodes.iter().enumerate() {
            self.wire_node(&node_map, node_map[index], node, &entity)?;
        }
        Ok(())
    }

    fn create_node(
        &mut self,
        flow: &FunctionFlow,
        node: &TemplateNode,
        entity: &str,
    ) -> Result<NodeId> {
        Ok(match node {
            TemplateNode::Parameter { index } => {
                *flow.parameters.get(*index as usize).ok_or_else(|| {
                    AnalysisError::malformed(entity, format!("parameter {index} out of range"))
                })?
            }
            TemplateNode::Const { ty } | TemplateNode::Singleton { ty } => {
                self.concrete_source(*ty)
            }
            TemplateNode::NewObject { result_type, .. } => self.concrete_source(*result_type),
            TemplateNode::StaticCall { callee, .. } => self.flow(*callee).returns,
            TemplateNode::VtableCall { receiver_type, .. }
            | TemplateNode::ItableCall { receiver_type, .. } => {
                if *receiver_type == self.symbols.virtual_type() {
                    // Opaque receiver: no reachable concrete dispatch.
                    self.graph.void_node()
                } else {
                    self.graph.add_ordinary()
                }
            }
            TemplateNode::FieldRead { field, .. } => self.field_node(*field),
            TemplateNode::FieldWrite { .. } => self.graph.void_node(),
            TemplateNode::Variable { .. } | TemplateNode::TempVariable { .. } => {
                self.graph.add_ordinary()
            }
        })
    }

    /// Route one template edge into `target`, applying the edge's own cast
    /// and an optional extra narrowing (receiver casts).
    fn connect(
        &mut self,
        node_map: &[NodeId],
        edge: &TemplateEdge,
        target: NodeId,
        extra_cast: Option<TypeRef>,
        entity: &str,
    ) -> Result<()> {
        let source = self.mapped(node_map, edge.node, entity)?;
        match (edge.cast, extra_cast) {
            (None, None) => self.graph.add_edge(source, target),
            (Some(cast), None) | (None, Some(cast)) => {
                self.graph.add_cast_edge(source, target, cast)
            }
            (Some(first), Some(second)) => {
                let mid = self.graph.add_ordinary();
                self.graph.add_cast_edge(source, mid, first);
                self.graph.add_cast_edge(mid, target, second);
            }
        }
        Ok(())
    }

    fn mapped(
        &self,
        node_map: &[NodeId],
        node: TemplateNodeId,
        entity: &str,
    ) -> Result<NodeId> {
        node_map.get(node.index()).copied().ok_or_else(|| {
            AnalysisError::malformed(entity, format!("edge references unknown node {}", node.0))
        })
    }

    /// Wire arguments into a callee's parameters pairwise.
    fn connect_arguments(
        &mut self,
        node_map: &[NodeId],
        arguments: &[(TemplateEdge, Option<TypeRef>)],
        callee: FunRef,
        entity: &str,
    ) -> Result<NodeId> {
        let callee_flow = self.flow(callee);
        if callee_flow.has_template && arguments.len() != callee_flow.parameters.len() {
            return Err(AnalysisError::malformed(
                entity,
                format!(
                    "call to `{}` passes {} arguments, callee expects {}",
                    self.symbols.function_name(callee),
                    arguments.len(),
                    callee_flow.parameters.len()
                ),
            ));
        }
        for (index, (edge, extra_cast)) in arguments.iter().enumerate() {
            let Some(&parameter) = callee_flow.parameters.get(index) else {
                break;
            };
            self.connect(node_map, edge, parameter, *extra_cast, entity)?;
        }
        Ok(callee_flow.returns)
    }

    fn wire_node(
        &mut self,
        node_map: &[NodeId],
        this_node: NodeId,
        node: &TemplateNode,
        entity: &str,
    ) -> Result<()> {
        match node {
            TemplateNode::Parameter { .. }
            | TemplateNode::Const { .. }
            | TemplateNode::Singleton { .. } => {}

            TemplateNode::StaticCall {
                callee,
                arguments,
                receiver_type,
                ..
            } => {
                let arguments: Vec<(TemplateEdge, Option<TypeRef>)> = arguments
                    .iter()
                    .enumerate()
                    .map(|(i, &edge)| {
                        let extra = if i == 0 { *receiver_type } else { None };
                        (edge, extra)
                    })
                    .collect();
                self.connect_arguments(node_map, &arguments, *callee, entity)?;
            }

            TemplateNode::NewObject {
                ctor, arguments, ..
            } => {
                // The fresh instance is argument 0 of the constructor.
                let instance = this_node;
                let ctor_flow = self.flow(*ctor);
                if let Some(&receiver) = ctor_flow.parameters.first() {
                    self.graph.add_edge(instance, receiver);
                }
                for (index, edge) in arguments.iter().enumerate() {
                    let Some(&parameter) = ctor_flow.parameters.get(index + 1) else {
                        if ctor_flow.has_template {
                            return Err(AnalysisError::malformed(
                                entity,
                                "constructor arity mismatch",
                            ));
                        }
                        break;
                    };
                    self.connect(node_map, edge, parameter, None, entity)?;
                }
            }

            TemplateNode::VtableCall {
                receiver_type,
                vtable_index,
                arguments,
                call_site,
                ..
            } => {
                if this_node == self.graph.void_node() {
                    return Ok(());
                }
                self.expand_virtual_call(
                    node_map,
                    this_node,
                    *receiver_type,
                    arguments,
                    VirtualDispatch::Vtable(*vtable_index),
                    *call_site,
                    entity,
                )?;
            }

            TemplateNode::ItableCall {
                receiver_type,
                method_hash,
                arguments,
                call_site,
                ..
            } => {
                if this_node == self.graph.void_node() {
                    return Ok(());
                }
                self.expand_virtual_call(
                    node_map,
                    this_node,
                    *receiver_type,
                    arguments,
                    VirtualDispatch::Itable(*method_hash),
                    *call_site,
                    entity,
                )?;
            }

            TemplateNode::FieldRead { receiver, .. } => {
                if let Some(edge) = receiver {
                    let void = self.graph.void_node();
                    self.connect(node_map, edge, void, None, entity)?;
                }
            }

            TemplateNode::FieldWrite {
                receiver,
                field,
                value,
            } => {
                if let Some(edge) = receiver {
                    let void = self.graph.void_node();
                    self.connect(node_map, edge, void, None, entity)?;
                }
                let field_node = self.field_node(*field);
                self.connect(node_map, value, field_node, None, entity)?;
            }

            TemplateNode::Variable { values } | TemplateNode::TempVariable { values } => {
                for edge in values {
                    self.connect(node_map, edge, this_node, None, entity)?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_virtual_call(
        &mut self,
        node_map: &[NodeId],
        result: NodeId,
        receiver_type: TypeRef,
        arguments: &[TemplateEdge],
        dispatch: VirtualDispatch,
        call_site: Option<CallSiteRef>,
        entity: &str,
    ) -> Result<()> {
        let receiver_edge = arguments.first().ok_or_else(|| {
            AnalysisError::malformed(entity, "virtual call without a receiver argument")
        })?;

        // The implicit down-cast on dispatch: receiver values narrow to the
        // declared receiver class before fan-out.
        let casted_receiver = self.graph.add_ordinary();
        self.connect(
            node_map,
            receiver_edge,
            casted_receiver,
            Some(receiver_type),
            entity,
        )?;

        let candidates: Vec<TypeRef> = self
            .instantiated
            .iter()
            .copied()
            .filter(|&t| self.symbols.is_subtype(t, receiver_type))
            .collect();

        let mut callees = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let entry = self.symbols.type_entry(candidate);
            let callee = match dispatch {
                VirtualDispatch::Vtable(index) => {
                    entry.vtable.get(index as usize).copied().ok_or_else(|| {
                        AnalysisError::malformed(
                            self.symbols.type_name(candidate),
                            format!("no vtable slot {index} for virtual call in `{entity}`"),
                        )
                    })?
                }
                VirtualDispatch::Itable(hash) => entry.itable_lookup(hash).ok_or_else(|| {
                    AnalysisError::MissingItableEntry {
                        class: self.symbols.type_name(candidate).to_string(),
                        hash,
                    }
                })?,
            };

            let mut call_arguments: Vec<(TemplateEdge, Option<TypeRef>)> =
                Vec::with_capacity(arguments.len());
            for &edge in &arguments[1..] {
                call_arguments.push((edge, None));
            }
            let callee_flow = self.flow(callee);
            if let Some(&receiver_parameter) = callee_flow.parameters.first() {
                self.graph.add_edge(casted_receiver, receiver_parameter);
            }
            if callee_flow.has_template
                && call_arguments.len() + 1 != callee_flow.parameters.len()
            {
                return Err(AnalysisError::malformed(
                    entity,
                    format!(
                        "virtual call to `{}` arity mismatch",
                        self.symbols.function_name(callee)
                    ),
                ));
            }
            for (index, (edge, _)) in call_arguments.iter().enumerate() {
                let Some(&parameter) = callee_flow.parameters.get(index + 1) else {
                    break;
                };
                self.connect(node_map, edge, parameter, None, entity)?;
            }
            self.graph.add_edge(callee_flow.returns, result);
            callees.push((candidate, callee));
        }

        if let Some(call_site) = call_site {
            self.graph.virtual_call_sites.push(VirtualCallSite {
                call_site,
                receiver: casted_receiver,
                callees,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum VirtualDispatch {
    Vtable(u32),
    Itable(u64),
}
