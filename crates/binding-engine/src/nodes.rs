//! Node variants and per-node attributes for binding graphs
//!
//! A binding graph is bipartite: task-like nodes (which consume and produce
//! files) alternate with file-like nodes (which carry one file slot each).
//! Node identity is the structural tuple carried by the variant; the graph
//! container owns adjacency and the mutable attributes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntryId, FileType, OperatorId, TaskId, TaskState};

/// The two node families of the bipartite graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeFamily {
    TaskLike,
    FileLike,
}

/// A task-like node: consumes N input files, produces M output files
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskNode {
    /// A user-supplied workflow input, addressable by entry id
    EntryPoint { entry_id: EntryId, file_type: FileType },
    /// An ordinary task instance
    Task { task_id: TaskId, instance_id: u32 },
    /// Companion task that emits the chunk manifest for a scatterable task
    Scatter {
        task_id: TaskId,
        original_instance_id: u32,
        instance_id: u32,
    },
    /// One parallel shard of a scattered task
    Chunked {
        task_id: TaskId,
        instance_id: u32,
        chunk_id: String,
    },
    /// Fan-in task that consumes a gathered chunk manifest
    Gather {
        task_id: TaskId,
        gather_index: u32,
        chunk_key: String,
    },
}

impl TaskNode {
    /// The catalog task id this node refers to, if any
    ///
    /// Entry points are task-like for scheduling purposes but have no
    /// catalog entry.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskNode::EntryPoint { .. } => None,
            TaskNode::Task { task_id, .. }
            | TaskNode::Scatter { task_id, .. }
            | TaskNode::Chunked { task_id, .. }
            | TaskNode::Gather { task_id, .. } => Some(task_id),
        }
    }

    /// The instance id of this node, if it carries one
    pub fn instance_id(&self) -> Option<u32> {
        match self {
            TaskNode::EntryPoint { .. } => None,
            TaskNode::Task { instance_id, .. }
            | TaskNode::Scatter { instance_id, .. }
            | TaskNode::Chunked { instance_id, .. } => Some(*instance_id),
            TaskNode::Gather { gather_index, .. } => Some(*gather_index),
        }
    }
}

impl fmt::Display for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskNode::EntryPoint { entry_id, file_type } => {
                write!(f, "EntryPoint({}, {})", entry_id, file_type.file_type_id)
            }
            TaskNode::Task { task_id, instance_id } => {
                write!(f, "Task({}:{})", task_id, instance_id)
            }
            TaskNode::Scatter {
                task_id,
                original_instance_id,
                instance_id,
            } => write!(
                f,
                "Scatter({}:{} from instance {})",
                task_id, instance_id, original_instance_id
            ),
            TaskNode::Chunked {
                task_id,
                instance_id,
                chunk_id,
            } => write!(f, "Chunked({}:{} chunk {})", task_id, instance_id, chunk_id),
            TaskNode::Gather {
                task_id,
                gather_index,
                chunk_key,
            } => write!(f, "Gather({}:{} key {})", task_id, gather_index, chunk_key),
        }
    }
}

/// A file-like node: one file slot with a type and a position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FileNode {
    /// Output slot of an entry point
    EntryOut { entry_id: EntryId, file_type: FileType },
    /// Input slot of a task instance at position `index`
    In {
        task_id: TaskId,
        instance_id: u32,
        index: usize,
        file_type: FileType,
    },
    /// Output slot of a task instance at position `index`
    Out {
        task_id: TaskId,
        instance_id: u32,
        index: usize,
        file_type: FileType,
    },
    /// Input slot of one chunked shard
    ChunkIn {
        task_id: TaskId,
        instance_id: u32,
        index: usize,
        file_type: FileType,
        chunk_id: String,
    },
    /// Output slot of one chunked shard
    ChunkOut {
        task_id: TaskId,
        instance_id: u32,
        index: usize,
        file_type: FileType,
        chunk_id: String,
    },
}

impl FileNode {
    /// The file type carried by this slot
    pub fn file_type(&self) -> &FileType {
        match self {
            FileNode::EntryOut { file_type, .. }
            | FileNode::In { file_type, .. }
            | FileNode::Out { file_type, .. }
            | FileNode::ChunkIn { file_type, .. }
            | FileNode::ChunkOut { file_type, .. } => file_type,
        }
    }

    /// The positional index of this slot (entry outputs are position 0)
    pub fn index(&self) -> usize {
        match self {
            FileNode::EntryOut { .. } => 0,
            FileNode::In { index, .. }
            | FileNode::Out { index, .. }
            | FileNode::ChunkIn { index, .. }
            | FileNode::ChunkOut { index, .. } => *index,
        }
    }

    /// Whether this slot is an input slot of a task
    pub fn is_input(&self) -> bool {
        matches!(self, FileNode::In { .. } | FileNode::ChunkIn { .. })
    }
}

impl fmt::Display for FileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileNode::EntryOut { entry_id, file_type } => {
                write!(f, "EntryOut({}, {})", entry_id, file_type.file_type_id)
            }
            FileNode::In {
                task_id,
                instance_id,
                index,
                ..
            } => write!(f, "In({}:{}.{})", task_id, instance_id, index),
            FileNode::Out {
                task_id,
                instance_id,
                index,
                ..
            } => write!(f, "Out({}:{}.{})", task_id, instance_id, index),
            FileNode::ChunkIn {
                task_id,
                instance_id,
                index,
                chunk_id,
                ..
            } => write!(
                f,
                "ChunkIn({}:{}.{} chunk {})",
                task_id, instance_id, index, chunk_id
            ),
            FileNode::ChunkOut {
                task_id,
                instance_id,
                index,
                chunk_id,
                ..
            } => write!(
                f,
                "ChunkOut({}:{}.{} chunk {})",
                task_id, instance_id, index, chunk_id
            ),
        }
    }
}

/// A node of either family
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Task(TaskNode),
    File(FileNode),
}

impl Node {
    /// Which family this node belongs to
    pub fn family(&self) -> NodeFamily {
        match self {
            Node::Task(_) => NodeFamily::TaskLike,
            Node::File(_) => NodeFamily::FileLike,
        }
    }

    /// The task-like variant, if this is one
    pub fn as_task(&self) -> Option<&TaskNode> {
        match self {
            Node::Task(t) => Some(t),
            Node::File(_) => None,
        }
    }

    /// The file-like variant, if this is one
    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::Task(_) => None,
            Node::File(f) => Some(f),
        }
    }
}

impl From<TaskNode> for Node {
    fn from(n: TaskNode) -> Self {
        Node::Task(n)
    }
}

impl From<FileNode> for Node {
    fn from(n: FileNode) -> Self {
        Node::File(n)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Task(t) => t.fmt(f),
            Node::File(n) => n.fmt(f),
        }
    }
}

/// Mutable attributes of a file-like node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttrs {
    /// Concrete path, once resolved
    pub path: Option<PathBuf>,
    /// Whether the slot has been resolved to a path
    pub is_resolved: bool,
    /// When the slot was resolved
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Mutable attributes of a task-like node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAttrs {
    /// Current lifecycle state
    pub state: TaskState,
    /// Wall-clock runtime in seconds, recorded at completion
    pub run_time_sec: Option<f64>,
    /// Error message recorded on failure
    pub error_message: Option<String>,
    /// Requested processor count
    pub nproc: u32,
    /// Resolved task options
    pub resolved_options: BTreeMap<String, serde_json::Value>,
    /// Rendered commands, recorded by the executor
    pub commands: Vec<String>,
    /// Whether a chunk operator applies to this task
    pub is_chunkable: bool,
    /// Latched once gather nodes have been grafted for this scatter task
    pub is_chunk_running: bool,
    /// Operator id recorded when the task is labelled chunkable
    pub operator_id: Option<OperatorId>,
    /// On a scatter node: chunk expansion already happened. On an ordinary
    /// task: the task was superseded by a scatter graft.
    pub was_chunked: bool,
}

impl Default for TaskAttrs {
    fn default() -> Self {
        Self {
            state: TaskState::Created,
            run_time_sec: None,
            error_message: None,
            nproc: 1,
            resolved_options: BTreeMap::new(),
            commands: Vec::new(),
            is_chunkable: false,
            is_chunk_running: false,
            operator_id: None,
            was_chunked: false,
        }
    }
}
