use thiserror::Error;

/// Failures of the devirtualization analysis.
///
/// Malformed-IR conditions are producer bugs and abort the analysis; there is
/// no partial-result mode. Unknown external references are not errors, they
/// downgrade to `External` identities inside the symbol table.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("malformed IR in `{entity}`: {reason}")]
    MalformedIr { entity: String, reason: String },

    #[error("class `{class}` is declared both final and abstract")]
    FinalAbstractClass { class: String },

    #[error("no itable entry with hash {hash:#018x} in candidate receiver `{class}`")]
    MissingItableEntry { class: String, hash: u64 },

    #[error("devirtualized callee `{function}` is not virtually callable")]
    NonVirtualCallee { function: String },

    #[error("dispatch table error: {0}")]
    Vtable(#[from] classflow_ir::VtableError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("summary serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("summary format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("corrupted summary for module `{module}`")]
    CorruptedSummary { module: String },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

impl AnalysisError {
    pub fn malformed(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        AnalysisError::MalformedIr {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}
