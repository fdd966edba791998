//! Analysis driver: summarize, link, condense, propagate, devirtualize,
//! rewrite — in that order, single-threaded.

use std::sync::Arc;

use classflow_ir::{IrProgram, ModuleKind, VtableBuilder};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::{AnalysisConfig, DevirtLevel};
use crate::devirt::{
    devirtualize, private_virtual_functions, rewrite_calls, DevirtualizedCallSite,
};
use crate::diagnostics::DiagnosticHandler;
use crate::errors::Result;
use crate::graph::{
    build_constraint_graph, collect_instantiated, propagate_types, select_roots,
};
use crate::summary::ModuleSummary;
use crate::symbols::{FunKind, FunRef, SymbolTable};
use crate::template::{build_templates, FunctionTemplate};

/// Counters describing one analysis run.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisStats {
    pub templates: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub components: usize,
    pub propagation_rounds: usize,
    pub devirtualized_sites: usize,
    pub rewritten_calls: usize,
}

/// Everything the analysis hands to its consumers.
pub struct AnalysisOutput {
    /// The module's serialized summary, for downstream compilations.
    pub summary: ModuleSummary,
    /// Devirtualized call sites keyed by their IR identity.
    pub devirtualized: Vec<DevirtualizedCallSite>,
    /// Private functions with a virtual-table slot, ordered by slot.
    pub private_virtual_functions: Vec<FunRef>,
    /// The linked symbol table, for resolving the refs above.
    pub symbols: SymbolTable,
    pub stats: AnalysisStats,
}

/// Whole-program devirtualization over one module plus its library
/// summaries.
pub struct DevirtualizationAnalysis {
    config: AnalysisConfig,
    handler: Arc<dyn DiagnosticHandler>,
}

impl DevirtualizationAnalysis {
    pub fn new(config: AnalysisConfig, handler: Arc<dyn DiagnosticHandler>) -> Self {
        Self { config, handler }
    }

    /// Run the full pipeline. With [`DevirtLevel::Analyze`] the IR is left
    /// untouched; with [`DevirtLevel::Off`] only summarization happens.
    pub fn run(
        &self,
        program: &mut IrProgram,
        libraries: &[ModuleSummary],
    ) -> Result<AnalysisOutput> {
        let vtables = VtableBuilder::new(program)?;
        let mut symbols = SymbolTable::new();

        let mut templates: FxHashMap<FunRef, FunctionTemplate> = FxHashMap::default();
        for library in libraries {
            let loaded = library.load_into(&mut symbols)?;
            debug!(
                module = library.module_name.as_str(),
                templates = loaded.templates.len(),
                "library summary loaded"
            );
            for template in loaded.templates {
                templates.entry(template.id).or_insert(template);
            }
        }

        let mapping = symbols.build_module(program, &vtables)?;
        let module_templates = build_templates(program, &symbols, &mapping, &vtables)?;
        let summary = ModuleSummary::build(&symbols, &mapping, &module_templates)?;

        self.report_unknown_externals(&symbols, &mapping, &templates);

        for template in module_templates {
            templates.insert(template.id, template);
        }

        let mut stats = AnalysisStats {
            templates: templates.len(),
            ..AnalysisStats::default()
        };
        let private_table = private_virtual_functions(&symbols, mapping.module);

        if self.config.level == DevirtLevel::Off {
            return Ok(AnalysisOutput {
                summary,
                devirtualized: Vec::new(),
                private_virtual_functions: private_table,
                symbols,
                stats,
            });
        }

        let main = match program.kind {
            ModuleKind::Program { main } => Some(mapping.function_of(main)),
            ModuleKind::Library => None,
        };
        let roots = select_roots(&symbols, main, &templates);
        let instantiated = collect_instantiated(&symbols, &templates);
        let mut graph = build_constraint_graph(&symbols, &templates, &instantiated, &roots)?;
        stats.graph_nodes = graph.node_count();
        stats.graph_edges = graph.edge_count();

        let propagation = propagate_types(&mut graph, &symbols);
        stats.components = propagation.components;
        stats.propagation_rounds = propagation.rounds;

        let devirtualized = devirtualize(&graph, &symbols)?;
        stats.devirtualized_sites = devirtualized.len();

        if self.config.level >= DevirtLevel::Rewrite {
            stats.rewritten_calls = rewrite_calls(program, &symbols, &devirtualized);
        }

        debug!(
            sites = stats.devirtualized_sites,
            rewritten = stats.rewritten_calls,
            "analysis finished"
        );
        Ok(AnalysisOutput {
            summary,
            devirtualized,
            private_virtual_functions: private_table,
            symbols,
            stats,
        })
    }

    /// External references with no loaded template lose precision at the
    /// boundary; say so once per function.
    fn report_unknown_externals(
        &self,
        symbols: &SymbolTable,
        mapping: &crate::symbols::ModuleSymbols,
        library_templates: &FxHashMap<FunRef, FunctionTemplate>,
    ) {
        for &f in &mapping.functions_in_order {
            let entry = symbols.function_entry(f);
            if matches!(entry.kind, FunKind::External { .. })
                && !library_templates.contains_key(&f)
            {
                self.handler.warning(
                    entry.kind.name(),
                    "no summary loaded for external function; its result is treated as opaque",
                );
            }
        }
    }
}
