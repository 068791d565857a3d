//! Core domain types for binding graphs
//!
//! These types define the immutable catalog side of a workflow: file types,
//! task metadata, and the task state machine.

use serde::{Deserialize, Serialize};

/// Unique identifier for a registered task (e.g. "pipewright.tasks.align")
pub type TaskId = String;

/// Unique identifier for a workflow entry point
pub type EntryId = String;

/// Unique identifier for a chunk operator
pub type OperatorId = String;

/// A registered file type: identity plus default output naming
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileType {
    /// Unique type identifier (e.g. "pipewright.files.fasta")
    pub file_type_id: String,
    /// Default base name for allocated output files
    pub base_name: String,
    /// Default file extension (without the dot)
    pub ext: String,
}

impl FileType {
    /// Create a new file type
    pub fn new(
        file_type_id: impl Into<String>,
        base_name: impl Into<String>,
        ext: impl Into<String>,
    ) -> Self {
        Self {
            file_type_id: file_type_id.into(),
            base_name: base_name.into(),
            ext: ext.into(),
        }
    }
}

/// Lifecycle states of a task-like node
///
/// The declaration order is the total order used for status reporting:
/// `Created < Ready < Submitted < Running < Successful < Failed < Killed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Node exists in the graph but has not been considered for scheduling
    Created,
    /// Eligible for scheduling
    Ready,
    /// Handed to the executor
    Submitted,
    /// Executing
    Running,
    /// Terminal: completed and produced its outputs
    Successful,
    /// Terminal: completed with an error
    Failed,
    /// Terminal: cancelled externally
    Killed,
}

impl TaskState {
    /// All recognized states, in reporting order
    pub const ALL_STATES: [TaskState; 7] = [
        TaskState::Created,
        TaskState::Ready,
        TaskState::Submitted,
        TaskState::Running,
        TaskState::Successful,
        TaskState::Failed,
        TaskState::Killed,
    ];

    /// Terminal states
    pub const COMPLETED_STATES: [TaskState; 3] =
        [TaskState::Successful, TaskState::Failed, TaskState::Killed];

    /// Whether this state is terminal
    pub fn is_completed(&self) -> bool {
        Self::COMPLETED_STATES.contains(self)
    }

    /// Whether a task in this state may still be picked up by the scheduler
    pub fn is_schedulable(&self) -> bool {
        matches!(self, TaskState::Created | TaskState::Ready)
    }
}

/// Kind of task in the catalog
///
/// Scatter tasks emit a chunk manifest; gather tasks fan chunked outputs
/// back in. Both share the `MetaTask` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Standard,
    Scatter,
    Gather,
}

impl Default for TaskKind {
    fn default() -> Self {
        TaskKind::Standard
    }
}

/// Metadata for a registered task
///
/// This is the immutable catalog entry consumed by the graph builder and
/// the scatter/gather rewriter. Instances of the task in the graph refer
/// back to it by `task_id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaTask {
    /// Unique task identifier
    pub task_id: TaskId,
    /// Task kind (standard, scatter companion, gather fan-in)
    #[serde(default)]
    pub kind: TaskKind,
    /// Declared input slots, by position
    pub input_types: Vec<FileType>,
    /// Declared output slots, by position
    pub output_types: Vec<FileType>,
    /// Requested processor count
    #[serde(default = "default_nproc")]
    pub nproc: u32,
    /// Optional per-output (base name, extension) overrides for the
    /// path allocator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_names: Option<Vec<(String, String)>>,
    /// Optional mutable-file pairs (`$inputs.I`, `$outputs.J`): output J
    /// aliases the path of input I
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutable_files: Option<Vec<(String, String)>>,
}

fn default_nproc() -> u32 {
    1
}

impl MetaTask {
    /// Create a standard task with the given io signature
    pub fn new(
        task_id: impl Into<String>,
        input_types: Vec<FileType>,
        output_types: Vec<FileType>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            kind: TaskKind::Standard,
            input_types,
            output_types,
            nproc: 1,
            output_file_names: None,
            mutable_files: None,
        }
    }

    /// Set the task kind
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the processor count
    pub fn with_nproc(mut self, nproc: u32) -> Self {
        self.nproc = nproc;
        self
    }

    /// Number of declared input slots
    pub fn input_arity(&self) -> usize {
        self.input_types.len()
    }

    /// Number of declared output slots
    pub fn output_arity(&self) -> usize {
        self.output_types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_reporting_order() {
        assert!(TaskState::Created < TaskState::Ready);
        assert!(TaskState::Ready < TaskState::Running);
        assert!(TaskState::Running < TaskState::Successful);
    }

    #[test]
    fn test_task_state_completed() {
        assert!(TaskState::Successful.is_completed());
        assert!(TaskState::Failed.is_completed());
        assert!(TaskState::Killed.is_completed());
        assert!(!TaskState::Running.is_completed());
        assert!(!TaskState::Created.is_completed());
    }

    #[test]
    fn test_meta_task_arity() {
        let ft = FileType::new("pipewright.files.txt", "file", "txt");
        let meta = MetaTask::new("pipewright.tasks.t1", vec![ft.clone()], vec![ft.clone(), ft]);
        assert_eq!(meta.input_arity(), 1);
        assert_eq!(meta.output_arity(), 2);
        assert_eq!(meta.kind, TaskKind::Standard);
        assert_eq!(meta.nproc, 1);
    }

    #[test]
    fn test_meta_task_serde_defaults() {
        let json = r#"{
            "taskId": "pipewright.tasks.t1",
            "inputTypes": [{"fileTypeId": "f", "baseName": "file", "ext": "txt"}],
            "outputTypes": []
        }"#;
        let meta: MetaTask = serde_json::from_str(json).unwrap();
        assert_eq!(meta.kind, TaskKind::Standard);
        assert_eq!(meta.nproc, 1);
        assert!(meta.output_file_names.is_none());
    }
}
