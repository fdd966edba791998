//! Whole-program devirtualization analysis.
//!
//! The pipeline summarizes each function body into a dataflow template,
//! links templates (local and from library summaries) into one constraint
//! graph, propagates instantiated classes to a fixed point, and reports the
//! exact `(receiver class, target)` pairs reachable at every virtual call.
//! Calls with a single private target are rewritten into direct calls.

pub mod analysis;
pub mod config;
pub mod devirt;
pub mod diagnostics;
pub mod errors;
pub mod graph;
pub mod summary;
pub mod symbols;
pub mod template;

pub use analysis::{AnalysisOutput, AnalysisStats, DevirtualizationAnalysis};
pub use config::{AnalysisConfig, DevirtLevel};
pub use devirt::{devirtualize, private_virtual_functions, rewrite_calls, DevirtualizedCallSite};
pub use diagnostics::{
    CollectingDiagnosticHandler, ConsoleDiagnosticHandler, Diagnostic, DiagnosticHandler,
    DiagnosticLevel,
};
pub use errors::{AnalysisError, Result};
pub use summary::{LoadedModule, ModuleSummary, SUMMARY_VERSION};
pub use symbols::{
    FunKind, FunRef, FunctionEntry, ModuleSymbols, SymbolTable, TypeEntry, TypeKind, TypeRef,
};
pub use template::{BodyId, CallSiteRef, FunctionTemplate};
