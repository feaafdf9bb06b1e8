use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BelError {
    #[error("invalid Reactome identifier: {0}")]
    InvalidReactomeId(String),

    #[error("invalid record {id}: {message}")]
    InvalidRecord { id: String, message: String },

    #[error("entity not found in source: {0}")]
    UnknownEntity(String),

    #[error("cannot encode value for hashing: {0}")]
    Encoding(String),

    #[error("structural cycle detected at entity {entity} (path: {path})")]
    #[diagnostic(help("Reactome complexes are expected to be acyclic; the record is skipped"))]
    StructuralCycle { entity: String, path: String },

    #[error("entity {entity} nests deeper than {max_depth} levels")]
    NestingTooDeep { entity: String, max_depth: usize },

    #[error("reaction {reaction} has no {missing}")]
    IncompleteReaction {
        reaction: String,
        missing: &'static str,
    },

    #[error("graph store unavailable: {0}")]
    #[diagnostic(help("the store could not be reached; retry once it is back"))]
    StoreUnavailable(String),

    #[error("graph store rejected nanopub {identity}: {message}")]
    #[diagnostic(help("a rejected upsert means two statements collided on one identity"))]
    StoreRejected { identity: String, message: String },

    #[error("Reactome request failed: {0}")]
    ReactomeHttp(String),

    #[error("Reactome returned status {status}: {message}")]
    ReactomeStatus { status: u16, message: String },

    #[error("missing config file reactome-bel.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl BelError {
    /// Errors confined to a single reaction. The run logs and skips them.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            BelError::InvalidReactomeId(_)
                | BelError::InvalidRecord { .. }
                | BelError::UnknownEntity(_)
                | BelError::Encoding(_)
                | BelError::StructuralCycle { .. }
                | BelError::NestingTooDeep { .. }
                | BelError::IncompleteReaction { .. }
                | BelError::ReactomeHttp(_)
                | BelError::ReactomeStatus { .. }
        )
    }

    /// Short machine-readable name used in run summaries.
    pub fn code(&self) -> &'static str {
        match self {
            BelError::InvalidReactomeId(_) => "invalid_id",
            BelError::InvalidRecord { .. } => "invalid_record",
            BelError::UnknownEntity(_) => "unknown_entity",
            BelError::Encoding(_) => "encoding",
            BelError::StructuralCycle { .. } => "structural_cycle",
            BelError::NestingTooDeep { .. } => "nesting_too_deep",
            BelError::IncompleteReaction { .. } => "incomplete_reaction",
            BelError::StoreUnavailable(_) => "store_unavailable",
            BelError::StoreRejected { .. } => "store_rejected",
            BelError::ReactomeHttp(_) | BelError::ReactomeStatus { .. } => "reactome_fetch",
            BelError::MissingConfig | BelError::ConfigRead(_) | BelError::ConfigParse(_) => {
                "config"
            }
            BelError::Filesystem(_) => "filesystem",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BelError::StoreUnavailable(_))
    }

    pub fn invalid_record(id: impl Into<String>, message: impl Into<String>) -> Self {
        BelError::InvalidRecord {
            id: id.into(),
            message: message.into(),
        }
    }
}
