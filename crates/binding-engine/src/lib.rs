//! Binding Engine - bipartite dataflow graphs with scatter/gather chunking
//!
//! This crate compiles a declarative set of task bindings into a directed
//! bipartite graph of task-like and file-like nodes, resolves it
//! incrementally as tasks complete, and dynamically rewrites the graph to
//! run one logical task as N parallel chunked instances plus a gather
//! fan-in. It supports:
//!
//! - Textual binding expressions (`ns.tasks.id:INDEX`, instanced
//!   `ns.tasks.id:INSTANCE:INDEX`, and `$entry:ID` entry references)
//! - Structural and file-type validation at build time
//! - Incremental path propagation and deterministic runnable selection
//! - Deterministic output-path allocation with mutable-file aliasing
//! - Scatter/gather chunking driven by chunk operators and JSON manifests
//!
//! # Architecture
//!
//! One scheduler owns each `BindingGraph` and mutates it in discrete
//! ticks. Task execution happens elsewhere; workers report outcomes
//! (success or failure, output paths, runtime) which the scheduler applies
//! through the resolver. Filesystem checks and chunk-manifest persistence
//! go through the injected [`io`] interfaces.
//!
//! # Example
//!
//! ```ignore
//! use binding_engine::{build_binding_graph, resolve_entry_point, next_runnable};
//!
//! let mut graph = build_binding_graph(&registry, &bindings)?;
//! resolve_entry_point(&mut graph, "e_01", Path::new("/data/reads.fasta"))?;
//! while let Some(task) = next_runnable(&graph)? {
//!     // hand `task` to the executor, then apply its outcome
//! }
//! ```

pub mod builder;
pub mod chunk;
pub mod context;
pub mod error;
pub mod graph;
pub mod io;
pub mod nodes;
pub mod parser;
pub mod paths;
pub mod registry;
pub mod resolver;
pub mod types;
pub mod validation;

// Re-export key types from each module
pub use builder::{build_binding_graph, Binding};
pub use chunk::{
    add_scatter_task, expand_scattered_tasks, gather_completed_chunks, label_chunkable_tasks,
    ChunkOperator, GatherChunkSpec, GatherSpec, PipelineChunk, ScatterChunkSpec, ScatterSpec,
};
pub use context::{RunContext, GATHERED_CHUNKS_FILE};
pub use error::{BindingError, Result};
pub use graph::{BindingGraph, NodeIndex};
pub use io::{ChunkIo, FileSystemProbe, JsonChunkIo, StdFileSystemProbe};
pub use nodes::{FileAttrs, FileNode, Node, NodeFamily, TaskAttrs, TaskNode};
pub use parser::{parse_binding_ref, strip_entry_prefix, BindingRef, ENTRY_PREFIX};
pub use paths::resolve_output_paths;
pub use registry::{OperatorRegistry, TaskRegistry};
pub use resolver::{
    has_next_runnable_task, is_workflow_complete, mark_task_failed, mark_task_success,
    next_runnable, propagate_resolved_paths, resolve_entry_point, resolve_entry_points,
    resolve_file, task_input_files, tasks_by_state, update_task_state, was_task_successful,
    was_task_successful_with_outputs, was_workflow_successful, SuccessResolution,
};
pub use types::{EntryId, FileType, MetaTask, OperatorId, TaskId, TaskKind, TaskState};
