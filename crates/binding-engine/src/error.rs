//! Error types for the binding engine

use thiserror::Error;

/// Result type alias using BindingError
pub type Result<T> = std::result::Result<T, BindingError>;

/// Errors that can occur while building or resolving a binding graph
#[derive(Debug, Error)]
pub enum BindingError {
    /// Binding text matched none of the three grammars
    #[error("Binding '{0}' matched neither the task, advanced task, nor entry grammar")]
    MalformedBindingStr(String),

    /// Structurally valid binding text that refers to an impossibility
    #[error("Malformed binding: {0}")]
    MalformedBinding(String),

    /// Unknown task id in the registered task catalog
    #[error("Unable to find task id '{0}'")]
    TaskIdNotFound(String),

    /// Binding index exceeds the task's declared arity
    #[error("Invalid index {index} for {io} types of task '{task_id}' (max index {max_index})")]
    IndexOutOfRange {
        task_id: String,
        io: &'static str,
        index: usize,
        max_index: usize,
    },

    /// Structural graph invariant violated
    #[error("Malformed binding graph: {0}")]
    MalformedBindingGraph(String),

    /// Producer and consumer file slots carry different file types
    #[error("Binding type incompatibility: {0}")]
    BindingFileTypeIncompatible(String),

    /// Resolution requested for an unknown entry point id
    #[error("Unable to resolve entry point id '{entry_id}'. Valid entry point ids: {valid_ids:?}")]
    InvalidEntryPoint {
        entry_id: String,
        valid_ids: Vec<String>,
    },

    /// No chunk operator registered for a scatter task id
    #[error("Unable to find chunk operator for scatter task id '{0}'")]
    OperatorNotFound(String),

    /// Chunk manifest lacks a key required by the chunk operator
    #[error("Unable to find required chunk key '{chunk_key}' in chunk '{chunk_id}'")]
    MissingChunkKey { chunk_key: String, chunk_id: String },

    /// Attempted transition out of a terminal task state
    #[error("Invalid task state transition: {0}")]
    InvalidTaskState(String),

    /// Chunk manifest is inconsistent with the graph
    #[error("Chunk manifest error: {0}")]
    ChunkManifest(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BindingError {
    /// Create a malformed-graph error with a message
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::MalformedBindingGraph(msg.into())
    }
}
