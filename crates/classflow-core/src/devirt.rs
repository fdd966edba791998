//! Devirtualizer and the call rewrite.
//!
//! Reads the fixed-point types at each remembered receiver; a site
//! devirtualizes only when every observed type is concrete. The rewrite
//! replaces calls with exactly one private callee by a direct, index-based
//! call into the owning module's virtual function table.

use classflow_ir::{ExprKind, IrProgram};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::errors::{AnalysisError, Result};
use crate::graph::ConstraintGraph;
use crate::symbols::{FunKind, FunRef, ModuleId, SymbolTable, TypeRef};
use crate::template::{BodyId, CallSiteRef};

/// One virtual call site with its enumerated dispatch targets.
#[derive(Debug, Clone)]
pub struct DevirtualizedCallSite {
    pub call_site: CallSiteRef,
    pub possible_callees: Vec<(TypeRef, FunRef)>,
}

/// Collect devirtualization results from the propagated graph.
pub fn devirtualize(
    graph: &ConstraintGraph,
    symbols: &SymbolTable,
) -> Result<Vec<DevirtualizedCallSite>> {
    let mut sites = Vec::new();
    for site in &graph.virtual_call_sites {
        let types = graph.types(site.receiver);
        if types.is_empty() {
            // Unreachable receiver.
            continue;
        }
        if types.iter().any(|flow| flow.is_virtual) {
            debug!(
                expr = site.call_site.expr.0,
                "receiver observed virtually, site kept polymorphic"
            );
            continue;
        }
        let nothing = symbols.nothing_type();
        let possible_callees: Vec<(TypeRef, FunRef)> = site
            .callees
            .iter()
            .copied()
            .filter(|&(receiver, _)| Some(receiver) != nothing)
            .filter(|&(receiver, _)| types.iter().any(|flow| flow.ty == receiver))
            .collect();
        for &(_, callee) in &possible_callees {
            let entry = symbols.function_entry(callee);
            if entry.kind.is_declared() && entry.kind.symbol_index() < 0 {
                return Err(AnalysisError::NonVirtualCallee {
                    function: entry.kind.name().to_string(),
                });
            }
        }
        sites.push(DevirtualizedCallSite {
            call_site: site.call_site,
            possible_callees,
        });
    }
    debug!(sites = sites.len(), "devirtualized call sites collected");
    Ok(sites)
}

/// Replace single-callee private calls with direct index-based calls.
/// Returns the number of rewritten expressions.
pub fn rewrite_calls(
    program: &mut IrProgram,
    symbols: &SymbolTable,
    sites: &[DevirtualizedCallSite],
) -> usize {
    let mut by_site: FxHashMap<CallSiteRef, &DevirtualizedCallSite> = FxHashMap::default();
    for site in sites {
        by_site.insert(site.call_site, site);
    }

    let mut rewritten = 0;
    for function_index in 0..program.functions.len() {
        let body_id = BodyId::Function(classflow_ir::FunId(function_index as u32));
        rewritten += rewrite_body(program, symbols, &by_site, body_id);
    }
    for field_index in 0..program.fields.len() {
        let body_id = BodyId::FieldInitializer(classflow_ir::FieldId(field_index as u32));
        rewritten += rewrite_body(program, symbols, &by_site, body_id);
    }
    debug!(rewritten, "single-callee private calls rewritten");
    rewritten
}

struct Replacement {
    expr: classflow_ir::ExprId,
    module_name: classflow_ir::StringId,
    virtual_function_count: u32,
    symbol_index: u32,
}

fn rewrite_body(
    program: &mut IrProgram,
    symbols: &SymbolTable,
    by_site: &FxHashMap<CallSiteRef, &DevirtualizedCallSite>,
    body_id: BodyId,
) -> usize {
    let body = match body_id {
        BodyId::Function(f) => program.functions[f.index()].body.as_ref(),
        BodyId::FieldInitializer(f) => program.fields[f.index()].initializer.as_ref(),
    };
    let Some(body) = body else {
        return 0;
    };

    // Collect the replacements first; interning the module name needs
    // mutable access to the program.
    let mut planned = Vec::new();
    for expr_index in 0..body.exprs.len() {
        let expr = classflow_ir::ExprId(expr_index as u32);
        let Some(site) = by_site.get(&CallSiteRef {
            body: body_id,
            expr,
        }) else {
            continue;
        };
        let [(_, callee)] = site.possible_callees.as_slice() else {
            continue;
        };
        let entry = symbols.function_entry(*callee);
        let FunKind::Private { symbol_index, .. } = entry.kind else {
            continue;
        };
        let Some(module) = entry.module else {
            continue;
        };
        let module_entry = symbols.module_entry(module);
        planned.push((
            expr,
            module_entry.name.clone(),
            module_entry.virtual_function_count,
            symbol_index as u32,
        ));
    }

    let replacements: Vec<Replacement> = planned
        .into_iter()
        .map(|(expr, name, virtual_function_count, symbol_index)| Replacement {
            expr,
            module_name: program.interner.intern(&name),
            virtual_function_count,
            symbol_index,
        })
        .collect();

    let body = match body_id {
        BodyId::Function(f) => program.functions[f.index()].body.as_mut(),
        BodyId::FieldInitializer(f) => program.fields[f.index()].initializer.as_mut(),
    };
    let Some(body) = body else {
        return 0;
    };

    let mut count = 0;
    for replacement in replacements {
        let old = body.expr_mut(replacement.expr);
        let ExprKind::Call {
            receiver: Some(receiver),
            arguments,
            ..
        } = &old.kind
        else {
            continue;
        };
        let (receiver, arguments) = (*receiver, arguments.clone());
        old.kind = ExprKind::DirectPrivateCall {
            module: replacement.module_name,
            virtual_function_count: replacement.virtual_function_count,
            index: replacement.symbol_index,
            receiver,
            arguments,
        };
        count += 1;
    }
    count
}

/// Private functions with a virtual-table slot, ordered by slot index, so
/// the backend can emit the module's virtual function table.
pub fn private_virtual_functions(symbols: &SymbolTable, module: ModuleId) -> Vec<FunRef> {
    let mut table: Vec<(i32, FunRef)> = Vec::new();
    for (f, entry) in symbols.functions() {
        if entry.module != Some(module) {
            continue;
        }
        if let FunKind::Private { symbol_index, .. } = entry.kind {
            if symbol_index >= 0 {
                table.push((symbol_index, f));
            }
        }
    }
    table.sort_by_key(|&(index, _)| index);
    table.into_iter().map(|(_, f)| f).collect()
}
