use std::collections::BTreeMap;

use thiserror::Error;

/// Class name mapped to the layer indices that define it, bottom to top.
pub type ConflictMap = BTreeMap<String, Vec<usize>>;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("{message}")]
    InvalidArgument { message: String },

    #[error("{message}")]
    InvalidState { message: String },

    /// The compiler rejected a source.
    #[error("Could not compile source '{source_id}': {message}")]
    Compile { source_id: String, message: String },

    /// A class was absent from parent, layers and top cache.
    #[error("{message}")]
    Load { message: String },

    /// Layer replacement was rejected because forbidden duplicate class
    /// names were found. Each map is only present if the corresponding
    /// check was enabled.
    #[error("Found {} class name conflict(s).",
        .across_layers.as_ref().map_or(0, |m| m.len())
            + .parent_and_layers.as_ref().map_or(0, |m| m.len()))]
    ClassNameConflict {
        across_layers: Option<ConflictMap>,
        parent_and_layers: Option<ConflictMap>,
    },
}

impl EngineError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        EngineError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        EngineError::InvalidState {
            message: message.into(),
        }
    }

    pub(crate) fn compile(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Compile {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    pub(crate) fn load(message: impl Into<String>) -> Self {
        EngineError::Load {
            message: message.into(),
        }
    }
}
