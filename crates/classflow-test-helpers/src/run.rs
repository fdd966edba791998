//! Analysis invocation helpers for tests.

use std::sync::Arc;

use classflow_core::{
    AnalysisConfig, AnalysisOutput, CollectingDiagnosticHandler, DevirtualizationAnalysis,
    ModuleSummary, Result,
};
use classflow_ir::IrProgram;

/// Run the full pipeline with a default config and a collecting handler.
pub fn analyze(program: &mut IrProgram, libraries: &[ModuleSummary]) -> Result<AnalysisOutput> {
    analyze_with_config(program, libraries, AnalysisConfig::default())
}

pub fn analyze_with_config(
    program: &mut IrProgram,
    libraries: &[ModuleSummary],
    config: AnalysisConfig,
) -> Result<AnalysisOutput> {
    let handler = Arc::new(CollectingDiagnosticHandler::new());
    let analysis = DevirtualizationAnalysis::new(config, handler);
    analysis.run(program, libraries)
}
