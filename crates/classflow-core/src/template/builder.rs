//! Template builder: one walk over a function body, one node per value
//! expression.
//!
//! Dispatch classification happens here: an overridable callee without a
//! super-qualifier becomes a `VtableCall` (class owner) or `ItableCall`
//! (interface owner); everything else is a `StaticCall`. Casts never become
//! nodes, they live on the edges the value extractor produces.

use classflow_ir::{
    method_hash, Body, ClassId, ExprId, ExprKind, FieldId, FunId, FunctionKind, IrFunction,
    IrProgram, LocalId, ValueId, VtableBuilder,
};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::errors::{AnalysisError, Result};
use crate::symbols::{qualified_name, ModuleSymbols, SymbolTable, TypeRef};
use crate::template::{
    extract_values, find_elements, variable_closure, BodyId, CallSiteRef, ExtractedValue,
    FoundElements, FunctionTemplate, TemplateEdge, TemplateNode, TemplateNodeId, ValueOrigin,
};

/// Build templates for every function body and field initializer of the
/// module, in declaration order.
pub fn build_templates(
    program: &IrProgram,
    symbols: &SymbolTable,
    mapping: &ModuleSymbols,
    vtables: &VtableBuilder,
) -> Result<Vec<FunctionTemplate>> {
    let mut templates = Vec::new();
    for index in 0..program.functions.len() {
        let id = FunId(index as u32);
        let function = program.function(id);
        let Some(body) = &function.body else {
            continue;
        };
        let entity = qualified_name(program, id);
        let template = TemplateBuilder::new(
            program,
            symbols,
            mapping,
            vtables,
            body,
            BodyId::Function(id),
            Some(function),
            &entity,
        )?
        .build_function()?;
        templates.push(template);
    }
    for index in 0..program.fields.len() {
        let id = FieldId(index as u32);
        let field = program.field(id);
        let Some(initializer) = &field.initializer else {
            continue;
        };
        let entity = format!("{}$init", program.field_name(id));
        let template = TemplateBuilder::new(
            program,
            symbols,
            mapping,
            vtables,
            initializer,
            BodyId::FieldInitializer(id),
            None,
            &entity,
        )?
        .build_field_initializer(id)?;
        templates.push(template);
    }
    debug!(count = templates.len(), "function templates built");
    Ok(templates)
}

struct TemplateBuilder<'a> {
    program: &'a IrProgram,
    symbols: &'a SymbolTable,
    mapping: &'a ModuleSymbols,
    vtables: &'a VtableBuilder<'a>,
    body: &'a Body,
    body_id: BodyId,
    /// `None` for field initializers.
    function: Option<&'a IrFunction>,
    entity: &'a str,
    elements: FoundElements,
    closure: FxHashMap<LocalId, Vec<ExprId>>,
    nodes: Vec<TemplateNode>,
    expr_nodes: FxHashMap<ExprId, TemplateNodeId>,
    variable_nodes: FxHashMap<LocalId, TemplateNodeId>,
    singleton_nodes: FxHashMap<TypeRef, TemplateNodeId>,
    parameter_nodes: Vec<TemplateNodeId>,
    parameter_count: u32,
}

impl<'a> TemplateBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        program: &'a IrProgram,
        symbols: &'a SymbolTable,
        mapping: &'a ModuleSymbols,
        vtables: &'a VtableBuilder<'a>,
        body: &'a Body,
        body_id: BodyId,
        function: Option<&'a IrFunction>,
        entity: &'a str,
    ) -> Result<Self> {
        let inline_constructor = function.is_some_and(|f| f.is_inline_constructor);
        let elements = find_elements(program, body, entity, inline_constructor)?;
        let closure = variable_closure(body, &elements);
        let parameter_count = function.map_or(0, IrFunction::parameter_count);
        Ok(Self {
            program,
            symbols,
            mapping,
            vtables,
            body,
            body_id,
            function,
            entity,
            elements,
            closure,
            nodes: Vec::new(),
            expr_nodes: FxHashMap::default(),
            variable_nodes: FxHashMap::default(),
            singleton_nodes: FxHashMap::default(),
            parameter_nodes: Vec::new(),
            parameter_count,
        })
    }

    fn build_function(mut self) -> Result<FunctionTemplate> {
        let function = self
            .function
            .ok_or_else(|| AnalysisError::malformed(self.entity, "function body expected"))?;
        let id = match self.body_id {
            BodyId::Function(f) => self.mapping.function_of(f),
            BodyId::FieldInitializer(_) => {
                return Err(AnalysisError::malformed(self.entity, "function body expected"))
            }
        };

        self.create_parameters(function.is_suspend);
        self.create_variables();
        self.visit_interesting()?;
        self.backfill_variables()?;

        let return_values = self.elements.function_returns.clone();
        let mut values = Vec::with_capacity(return_values.len());
        for value in return_values {
            values.push(self.expression_to_edge(value)?);
        }
        let returns = self.push(TemplateNode::TempVariable { values });

        Ok(FunctionTemplate {
            id,
            parameter_count: self.parameter_count,
            nodes: self.nodes,
            returns,
        })
    }

    /// A field initializer is summarized as the computed value flowing into
    /// the global field node; it runs unconditionally at program start.
    fn build_field_initializer(mut self, field: FieldId) -> Result<FunctionTemplate> {
        let id = self.mapping.initializer_of(field).ok_or_else(|| {
            AnalysisError::malformed(self.entity, "field initializer without an identity")
        })?;

        self.create_variables();
        self.visit_interesting()?;
        self.backfill_variables()?;

        let value = self.expression_to_edge(self.body.root)?;
        self.push(TemplateNode::FieldWrite {
            receiver: None,
            field: self.mapping.field_of(field),
            value,
        });
        let returns = self.push(TemplateNode::TempVariable { values: Vec::new() });

        Ok(FunctionTemplate {
            id,
            parameter_count: 0,
            nodes: self.nodes,
            returns,
        })
    }

    fn create_parameters(&mut self, is_suspend: bool) {
        let count = self.parameter_count + u32::from(is_suspend);
        for index in 0..count {
            let node = self.push(TemplateNode::Parameter { index });
            self.parameter_nodes.push(node);
        }
    }

    /// Variable nodes exist before any reference to them; their values are
    /// backfilled from the closure once the walk is done.
    fn create_variables(&mut self) {
        let mut locals: Vec<LocalId> = self.closure.keys().copied().collect();
        locals.sort();
        for local in locals {
            let node = self.push(TemplateNode::Variable { values: Vec::new() });
            self.variable_nodes.insert(local, node);
        }
    }

    fn visit_interesting(&mut self) -> Result<()> {
        let interesting = self.elements.interesting.clone();
        for expr in interesting {
            self.node_for(expr)?;
        }
        Ok(())
    }

    fn backfill_variables(&mut self) -> Result<()> {
        let mut locals: Vec<LocalId> = self.closure.keys().copied().collect();
        locals.sort();
        for local in locals {
            let values = self.closure[&local].clone();
            let mut edges = Vec::with_capacity(values.len());
            for value in values {
                edges.push(self.expression_to_edge(value)?);
            }
            let node = self.variable_nodes[&local];
            match &mut self.nodes[node.index()] {
                TemplateNode::Variable { values } => *values = edges,
                _ => unreachable!("variable node ids only index Variable nodes"),
            }
        }
        Ok(())
    }

    fn push(&mut self, node: TemplateNode) -> TemplateNodeId {
        let id = TemplateNodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn map_type(&self, class: ClassId) -> TypeRef {
        self.mapping.type_of(class)
    }

    /// The node of `expr` per the value-extraction rules: a direct node when
    /// the expression is its own single value, a `TempVariable` otherwise.
    fn node_for(&mut self, expr: ExprId) -> Result<TemplateNodeId> {
        if let Some(&node) = self.expr_nodes.get(&expr) {
            return Ok(node);
        }
        let values = extract_values(
            self.program,
            self.body,
            &self.elements,
            expr,
            self.entity,
        )?;
        let node = if let [ExtractedValue {
            origin: ValueOrigin::Expr(e),
            casts,
        }] = values.as_slice()
        {
            if *e == expr && casts.is_empty() {
                self.direct_node(expr)?
            } else {
                self.temp_variable(&values)?
            }
        } else {
            self.temp_variable(&values)?
        };
        self.expr_nodes.insert(expr, node);
        Ok(node)
    }

    fn temp_variable(&mut self, values: &[ExtractedValue]) -> Result<TemplateNodeId> {
        let mut edges = Vec::with_capacity(values.len());
        for value in values {
            edges.push(self.value_to_edge(value)?);
        }
        Ok(self.push(TemplateNode::TempVariable { values: edges }))
    }

    /// Edge for a consumed expression: casts unwrap to an edge onto their
    /// argument's node, anything else is a plain edge.
    fn expression_to_edge(&mut self, expr: ExprId) -> Result<TemplateEdge> {
        if let ExprKind::TypeOperator {
            operator,
            operand,
            argument,
        } = self.body.kind(expr)
        {
            if operator.is_cast() {
                let (operand, argument) = (*operand, *argument);
                return Ok(TemplateEdge {
                    node: self.node_for(argument)?,
                    cast: Some(self.map_type(operand)),
                });
            }
        }
        Ok(TemplateEdge::plain(self.node_for(expr)?))
    }

    /// Edge for one extracted value; a multi-cast chain threads intermediate
    /// `TempVariable` nodes so each narrowing survives.
    fn value_to_edge(&mut self, value: &ExtractedValue) -> Result<TemplateEdge> {
        let mut node = match &value.origin {
            ValueOrigin::Expr(e) => self.node_for(*e)?,
            ValueOrigin::Singleton(class) => self.singleton_node(*class),
        };
        let Some((last, inner)) = value.casts.split_last() else {
            return Ok(TemplateEdge::plain(node));
        };
        for &cast in inner {
            let cast = self.map_type(cast);
            node = self.push(TemplateNode::TempVariable {
                values: vec![TemplateEdge {
                    node,
                    cast: Some(cast),
                }],
            });
        }
        Ok(TemplateEdge {
            node,
            cast: Some(self.map_type(*last)),
        })
    }

    fn singleton_node(&mut self, class: ClassId) -> TemplateNodeId {
        let ty = self.map_type(class);
        if let Some(&node) = self.singleton_nodes.get(&ty) {
            return node;
        }
        let node = self.push(TemplateNode::Singleton { ty });
        self.singleton_nodes.insert(ty, node);
        node
    }

    fn continuation_node(&mut self) -> Result<TemplateNodeId> {
        let function = self.function.ok_or_else(|| {
            AnalysisError::malformed(self.entity, "continuation read outside a function")
        })?;
        if function.is_suspend {
            // The trailing parameter, beyond the declared count.
            Ok(self.parameter_nodes[self.parameter_count as usize])
        } else if function.has_receiver {
            // Overrides of the coroutine-impl resume method reach their
            // continuation through the dispatch receiver.
            Ok(self.parameter_nodes[0])
        } else {
            Err(AnalysisError::malformed(
                self.entity,
                "continuation read in a non-suspend function without a receiver",
            ))
        }
    }

    fn direct_node(&mut self, expr: ExprId) -> Result<TemplateNodeId> {
        let ty = self.body.ty(expr);
        match self.body.kind(expr) {
            ExprKind::GetValue {
                value: ValueId::Parameter(index),
            } => {
                let index = *index as usize;
                self.parameter_nodes.get(index).copied().ok_or_else(|| {
                    AnalysisError::malformed(
                        self.entity,
                        format!("parameter index {index} out of range"),
                    )
                })
            }
            ExprKind::GetValue {
                value: ValueId::Local(local),
            } => {
                let local = *local;
                if let Some(&node) = self.variable_nodes.get(&local) {
                    return Ok(node);
                }
                // Read of a never-assigned local: an empty union.
                let node = self.push(TemplateNode::Variable { values: Vec::new() });
                self.variable_nodes.insert(local, node);
                Ok(node)
            }
            ExprKind::Const | ExprKind::Vararg { .. } | ExprKind::FunctionReference { .. } => {
                let ty = self.map_type(ty);
                Ok(self.push(TemplateNode::Const { ty }))
            }
            ExprKind::GetSingleton { class } => {
                let ty = self.map_type(*class);
                Ok(self.push(TemplateNode::Singleton { ty }))
            }
            ExprKind::GetContinuation => self.continuation_node(),
            ExprKind::TypeOperator { operator, .. } => {
                if operator.is_cast() {
                    return Err(AnalysisError::malformed(
                        self.entity,
                        "cast operator reached node construction",
                    ));
                }
                let ty = self.map_type(ty);
                Ok(self.push(TemplateNode::Const { ty }))
            }
            ExprKind::ConstructorCall { ctor, arguments } => {
                let (ctor, arguments) = (*ctor, arguments.clone());
                let mut edges = Vec::with_capacity(arguments.len());
                for a in arguments {
                    edges.push(self.expression_to_edge(a)?);
                }
                Ok(self.push(TemplateNode::NewObject {
                    ctor: self.mapping.function_of(ctor),
                    arguments: edges,
                    result_type: self.map_type(ty),
                }))
            }
            ExprKind::DelegatingConstructorCall { ctor, arguments } => {
                let (ctor, arguments) = (*ctor, arguments.clone());
                let this = *self.parameter_nodes.first().ok_or_else(|| {
                    AnalysisError::malformed(
                        self.entity,
                        "delegating constructor call outside a constructor",
                    )
                })?;
                let mut edges = vec![TemplateEdge::plain(this)];
                for a in arguments {
                    edges.push(self.expression_to_edge(a)?);
                }
                self.static_call_node(ctor, edges, None)
            }
            ExprKind::Call {
                callee,
                receiver,
                arguments,
                super_qualifier,
            } => {
                let (callee, receiver, arguments, super_qualifier) = (
                    *callee,
                    *receiver,
                    arguments.clone(),
                    *super_qualifier,
                );
                self.call_node(expr, callee, receiver, &arguments, super_qualifier)
            }
            ExprKind::GetField { receiver, field } => {
                let (receiver, field) = (*receiver, *field);
                let receiver = match receiver {
                    Some(r) => Some(self.expression_to_edge(r)?),
                    None => None,
                };
                Ok(self.push(TemplateNode::FieldRead {
                    receiver,
                    field: self.mapping.field_of(field),
                }))
            }
            ExprKind::SetField {
                receiver,
                field,
                value,
            } => {
                let (receiver, field, value) = (*receiver, *field, *value);
                let receiver = match receiver {
                    Some(r) => Some(self.expression_to_edge(r)?),
                    None => None,
                };
                let value = self.expression_to_edge(value)?;
                Ok(self.push(TemplateNode::FieldWrite {
                    receiver,
                    field: self.mapping.field_of(field),
                    value,
                }))
            }
            other => Err(AnalysisError::malformed(
                self.entity,
                format!("expression {other:?} is not a value node"),
            )),
        }
    }

    fn call_node(
        &mut self,
        expr: ExprId,
        callee: FunId,
        receiver: Option<ExprId>,
        arguments: &[ExprId],
        super_qualifier: Option<ClassId>,
    ) -> Result<TemplateNodeId> {
        let callee_info = self.program.function(callee);

        // Virtual dispatch: an overridable callee without a super-qualifier.
        if callee_info.is_overridable && super_qualifier.is_none() {
            let owner = callee_info.owner.ok_or_else(|| {
                AnalysisError::malformed(self.entity, "overridable callee without an owner class")
            })?;
            let receiver_expr = receiver.ok_or_else(|| {
                AnalysisError::malformed(self.entity, "virtual call without a dispatch receiver")
            })?;
            let owner_info = self.program.class(owner);
            if !owner_info.is_external {
                return self.virtual_call_node(expr, callee, owner, receiver_expr, arguments);
            }
            // External owner: resolvable when the owning library's summary
            // was loaded first; otherwise the hierarchy is unknown and the
            // boundary degrades to an opaque static call.
            if let Some(node) =
                self.external_virtual_call_node(expr, callee, owner, receiver_expr, arguments)?
            {
                return Ok(node);
            }
        }

        let resolved = match super_qualifier {
            Some(scope) => self.vtables.resolve_implementation(scope, callee)?,
            None => callee,
        };
        let resolved_info = self.program.function(resolved);
        let mut edges = Vec::new();
        let mut receiver_type = None;
        if let Some(r) = receiver {
            edges.push(self.expression_to_edge(r)?);
            receiver_type = resolved_info.owner.map(|c| self.map_type(c));
        }
        for &a in arguments {
            edges.push(self.expression_to_edge(a)?);
        }
        if resolved_info.is_suspend {
            let continuation = self.continuation_node()?;
            edges.push(TemplateEdge::plain(continuation));
        }
        self.static_call_node(resolved, edges, receiver_type)
    }

    fn static_call_node(
        &mut self,
        callee: FunId,
        arguments: Vec<TemplateEdge>,
        receiver_type: Option<TypeRef>,
    ) -> Result<TemplateNodeId> {
        let info = self.program.function(callee);
        let return_class = if info.kind == FunctionKind::Constructor {
            self.program.builtins.unit
        } else {
            info.return_type
        };
        Ok(self.push(TemplateNode::StaticCall {
            callee: self.mapping.function_of(callee),
            arguments,
            return_type: self.map_type(return_class),
            receiver_type,
        }))
    }

    /// Virtual call whose receiver class lives in a loaded library: the
    /// external stub resolves to the library's declared entry and the slot
    /// comes from that entry's dispatch tables.
    fn external_virtual_call_node(
        &mut self,
        expr: ExprId,
        callee: FunId,
        owner: ClassId,
        receiver: ExprId,
        arguments: &[ExprId],
    ) -> Result<Option<TemplateNodeId>> {
        let owner_info = self.program.class(owner);
        let receiver_type = self.map_type(owner);
        let owner_entry = self.symbols.type_entry(receiver_type);
        if !owner_entry.kind.is_declared() {
            return Ok(None);
        }
        let callee_info = self.program.function(callee);
        let mapped_callee = self.mapping.function_of(callee);

        // Pick the dispatch slot before building any edges, so an
        // unresolvable slot falls back cleanly to the static path.
        enum Slot {
            Vtable(u32),
            Itable(u64),
        }
        let slot = if owner_info.is_interface {
            let root = self.vtables.root_declaration(callee);
            Slot::Itable(method_hash(self.program.function_name(root)))
        } else {
            match owner_entry.vtable.iter().position(|&f| f == mapped_callee) {
                Some(index) => Slot::Vtable(index as u32),
                None => return Ok(None),
            }
        };

        let mut edges = vec![self.expression_to_edge(receiver)?];
        for &a in arguments {
            edges.push(self.expression_to_edge(a)?);
        }
        if callee_info.is_suspend {
            let continuation = self.continuation_node()?;
            edges.push(TemplateEdge::plain(continuation));
        }
        let call_site = Some(CallSiteRef {
            body: self.body_id,
            expr,
        });
        let return_type = self.map_type(callee_info.return_type);

        let node = match slot {
            Slot::Itable(method_hash) => TemplateNode::ItableCall {
                callee: mapped_callee,
                receiver_type,
                method_hash,
                arguments: edges,
                return_type,
                call_site,
            },
            Slot::Vtable(vtable_index) => TemplateNode::VtableCall {
                callee: mapped_callee,
                receiver_type,
                vtable_index,
                arguments: edges,
                return_type,
                call_site,
            },
        };
        Ok(Some(self.push(node)))
    }

    fn virtual_call_node(
        &mut self,
        expr: ExprId,
        callee: FunId,
        owner: ClassId,
        receiver: ExprId,
        arguments: &[ExprId],
    ) -> Result<TemplateNodeId> {
        let owner_info = self.program.class(owner);
        let callee_info = self.program.function(callee);
        let receiver_type = self.map_type(owner);

        let mut edges = vec![self.expression_to_edge(receiver)?];
        for &a in arguments {
            edges.push(self.expression_to_edge(a)?);
        }
        if callee_info.is_suspend {
            let continuation = self.continuation_node()?;
            edges.push(TemplateEdge::plain(continuation));
        }

        let call_site = Some(CallSiteRef {
            body: self.body_id,
            expr,
        });
        let return_type = self.map_type(callee_info.return_type);
        let mapped_callee = self.mapping.function_of(callee);

        let node = if owner_info.is_interface {
            let root = self.vtables.root_declaration(callee);
            let hash = method_hash(self.program.function_name(root));
            TemplateNode::ItableCall {
                callee: mapped_callee,
                receiver_type,
                method_hash: hash,
                arguments: edges,
                return_type,
                call_site,
            }
        } else {
            // Opaque owners carry the virtual sentinel; the constraint graph
            // short-circuits those receivers, so the slot index is unused.
            let vtable_index = if owner_info.is_opaque {
                0
            } else {
                self.vtables.vtable_index(owner, callee)?
            };
            TemplateNode::VtableCall {
                callee: mapped_callee,
                receiver_type,
                vtable_index,
                arguments: edges,
                return_type,
                call_site,
            }
        };
        Ok(self.push(node))
    }
}

