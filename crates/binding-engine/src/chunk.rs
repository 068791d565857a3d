//! Scatter/gather chunking over binding graphs
//!
//! A chunk operator names a scatter companion for one task and the gather
//! fan-ins for its outputs. Chunking grafts onto a live graph in three
//! steps: label chunkable tasks, add the scatter companion before
//! execution, then expand the manifest into parallel chunked instances
//! once the companion succeeds. When every chunked instance has finished,
//! the merged manifest is persisted and gather nodes are grafted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{BindingError, Result};
use crate::graph::{BindingGraph, NodeIndex};
use crate::io::ChunkIo;
use crate::nodes::{FileNode, Node, TaskNode};
use crate::registry::{OperatorRegistry, TaskRegistry};
use crate::resolver::{resolve_file, was_task_successful_with_outputs};
use crate::types::{MetaTask, OperatorId, TaskId, TaskKind, TaskState};

/// One shard of a scattered task
///
/// `datum` maps chunk keys (e.g. `$chunk.fasta_id`) to concrete values,
/// typically file paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineChunk {
    /// Unique id of this chunk within its manifest
    pub chunk_id: String,
    /// Chunk key -> concrete value
    #[serde(default)]
    pub datum: BTreeMap<String, String>,
}

impl PipelineChunk {
    /// Create an empty chunk
    pub fn new(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            datum: BTreeMap::new(),
        }
    }

    /// Add one datum entry
    pub fn with_datum(mut self, chunk_key: impl Into<String>, value: impl Into<String>) -> Self {
        self.datum.insert(chunk_key.into(), value.into());
        self
    }
}

/// Maps one chunk key onto one input slot of the chunked task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScatterChunkSpec {
    /// Key looked up in each chunk's datum
    pub chunk_key: String,
    /// Task input reference of shape `taskId:INDEX`; only the trailing
    /// index is consumed
    pub task_input: String,
}

/// The scatter half of a chunk operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScatterSpec {
    /// The task being chunked
    pub task_id: TaskId,
    /// The companion task that emits the chunk manifest
    pub scatter_task_id: TaskId,
    /// Chunk key -> input slot mappings for chunked instances
    pub chunks: Vec<ScatterChunkSpec>,
}

/// Maps one chunked output onto a gather fan-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherChunkSpec {
    /// Key written into the merged manifest for this output
    pub chunk_key: String,
    /// The gather task consuming the merged manifest
    pub gather_task_id: TaskId,
    /// Task output reference of shape `taskId:INDEX`; only the trailing
    /// index is consumed
    pub task_input: String,
}

/// The gather half of a chunk operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherSpec {
    pub chunks: Vec<GatherChunkSpec>,
}

/// Policy for chunking one task: how to scatter it and how to gather the
/// results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOperator {
    pub operator_id: OperatorId,
    pub scatter: ScatterSpec,
    pub gather: GatherSpec,
}

/// Extract the trailing slot index from a `taskId:INDEX` reference
fn task_input_index(task_input: &str) -> Result<usize> {
    task_input
        .rsplit(':')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            BindingError::MalformedBinding(format!(
                "task input reference '{}' must end in ':INDEX'",
                task_input
            ))
        })
}

/// Next free instance id for a task id, across ordinary, scatter, and
/// chunked instances
fn next_task_instance_id(g: &BindingGraph, task_id: &str) -> u32 {
    let mut max_seen = 0;
    for i in g.node_indices() {
        let instance_id = match g.node(i) {
            Node::Task(TaskNode::Task {
                task_id: id,
                instance_id,
            })
            | Node::Task(TaskNode::Scatter {
                task_id: id,
                instance_id,
                ..
            })
            | Node::Task(TaskNode::Chunked {
                task_id: id,
                instance_id,
                ..
            }) if id == task_id => *instance_id,
            _ => continue,
        };
        max_seen = max_seen.max(instance_id);
    }
    max_seen + 1
}

/// Mark every task with a registered scatter companion as chunkable
///
/// Returns the number of tasks labelled.
pub fn label_chunkable_tasks(g: &mut BindingGraph, operators: &OperatorRegistry) -> Result<usize> {
    // scatterable task id -> operator id
    let chunkable: BTreeMap<&str, &str> = operators
        .iter()
        .map(|(op_id, op)| (op.scatter.task_id.as_str(), op_id.as_str()))
        .collect();

    let mut labelled = 0;
    for t in g.task_nodes()? {
        let task_id = match g.node(t) {
            Node::Task(TaskNode::Task { task_id, .. }) => task_id.clone(),
            _ => continue,
        };
        if let Some(operator_id) = chunkable.get(task_id.as_str()) {
            log::info!("Found chunkable task '{}'", task_id);
            let operator_id = operator_id.to_string();
            if let Some(attrs) = g.task_attrs_mut(t) {
                attrs.is_chunkable = true;
                attrs.operator_id = Some(operator_id);
            }
            labelled += 1;
        }
    }

    if labelled == 0 {
        log::warn!(
            "Unable to find any chunkable tasks from {} chunk operators",
            operators.len()
        );
    }
    Ok(labelled)
}

/// Graft a scatter companion in front of a chunkable task
///
/// The companion consumes the same input files as the original task (the
/// existing file nodes, not copies) and emits the chunk-manifest outputs
/// declared by `scatter_meta`. The original task stays in the graph,
/// marked superseded so it never becomes runnable.
pub fn add_scatter_task(
    g: &mut BindingGraph,
    t: NodeIndex,
    scatter_meta: &MetaTask,
) -> Result<NodeIndex> {
    let original_instance_id = match g.node(t) {
        Node::Task(TaskNode::Task { instance_id, .. }) => *instance_id,
        other => {
            return Err(BindingError::graph(format!(
                "cannot scatter {}: not an ordinary task binding",
                other
            )));
        }
    };
    if scatter_meta.kind != TaskKind::Scatter {
        return Err(BindingError::MalformedBinding(format!(
            "task '{}' is not registered as a scatter task",
            scatter_meta.task_id
        )));
    }

    let instance_id = next_task_instance_id(g, &scatter_meta.task_id);
    let scatter = g.add_node(TaskNode::Scatter {
        task_id: scatter_meta.task_id.clone(),
        original_instance_id,
        instance_id,
    });
    log::debug!("Adding scattered task {} to graph", g.node(scatter));

    // same inputs as the original task, same file nodes
    let inputs: Vec<NodeIndex> = g.predecessors(t).to_vec();
    for input in inputs {
        g.add_edge(input, scatter)?;
    }

    for (index, file_type) in scatter_meta.output_types.iter().enumerate() {
        let out = g.add_node(FileNode::Out {
            task_id: scatter_meta.task_id.clone(),
            instance_id,
            index,
            file_type: file_type.clone(),
        });
        g.add_edge(scatter, out)?;
    }

    if let Some(attrs) = g.task_attrs_mut(t) {
        attrs.was_chunked = true;
    }
    Ok(scatter)
}

/// The sole manifest-carrying output file of a scatter node
fn scatter_manifest_file(g: &BindingGraph, scatter: NodeIndex) -> Result<(NodeIndex, PathBuf)> {
    let file = g.successors(scatter).first().copied().ok_or_else(|| {
        BindingError::ChunkManifest(format!("scatter task {} has no output file", g.node(scatter)))
    })?;
    let path = g
        .file_attrs(file)
        .and_then(|attrs| attrs.path.clone())
        .ok_or_else(|| {
            BindingError::ChunkManifest(format!(
                "scatter task {} succeeded but its chunk manifest is unresolved",
                g.node(scatter)
            ))
        })?;
    Ok((file, path))
}

/// Expand successful scatter tasks into chunked instances
///
/// Every scatter node that reached `Successful` and has not been expanded
/// yet gets one chunked task per manifest chunk, with its input slots
/// resolved directly from the chunk datum. Returns the new chunked node
/// indices.
pub fn expand_scattered_tasks(
    g: &mut BindingGraph,
    operators: &OperatorRegistry,
    tasks: &TaskRegistry,
    chunk_io: &dyn ChunkIo,
) -> Result<Vec<NodeIndex>> {
    let candidates: Vec<NodeIndex> = g
        .node_indices()
        .filter(|&i| {
            matches!(g.node(i), Node::Task(TaskNode::Scatter { .. }))
                && g.task_attrs(i)
                    .map(|attrs| attrs.state == TaskState::Successful && !attrs.was_chunked)
                    .unwrap_or(false)
        })
        .collect();

    let mut chunked_nodes = Vec::new();
    for scatter in candidates {
        let scatter_task_id = match g.node(scatter) {
            Node::Task(TaskNode::Scatter { task_id, .. }) => task_id.clone(),
            _ => continue,
        };
        let (manifest_file, manifest_path) = scatter_manifest_file(g, scatter)?;
        let chunks = chunk_io.load_chunks(&manifest_path)?;
        let operator = operators.find_by_scatter_task_id(&scatter_task_id)?;
        let meta = tasks.get_or_err(&operator.scatter.task_id)?;
        log::debug!("Chunking task '{}' into {} chunks", meta.task_id, chunks.len());

        // {chunk key -> input slot index}
        let mut key_to_index: Vec<(String, usize)> = Vec::new();
        for spec in &operator.scatter.chunks {
            key_to_index.push((spec.chunk_key.clone(), task_input_index(&spec.task_input)?));
        }

        let mut added_here = 0;
        for chunk in &chunks {
            let instance_id = next_task_instance_id(g, &meta.task_id);
            let chunked = g.add_node(TaskNode::Chunked {
                task_id: meta.task_id.clone(),
                instance_id,
                chunk_id: chunk.chunk_id.clone(),
            });

            for (chunk_key, in_index) in &key_to_index {
                let datum =
                    chunk
                        .datum
                        .get(chunk_key)
                        .ok_or_else(|| BindingError::MissingChunkKey {
                            chunk_key: chunk_key.clone(),
                            chunk_id: chunk.chunk_id.clone(),
                        })?;
                let file_type = meta.input_types.get(*in_index).ok_or_else(|| {
                    BindingError::IndexOutOfRange {
                        task_id: meta.task_id.clone(),
                        io: "input",
                        index: *in_index,
                        max_index: meta.input_arity().saturating_sub(1),
                    }
                })?;
                log::debug!(
                    "Mapping chunk key {} -> input {} with datum {}",
                    chunk_key,
                    in_index,
                    datum
                );

                let chunk_in = g.add_node(FileNode::ChunkIn {
                    task_id: meta.task_id.clone(),
                    instance_id,
                    index: *in_index,
                    file_type: file_type.clone(),
                    chunk_id: chunk.chunk_id.clone(),
                });
                g.add_edge(manifest_file, chunk_in)?;
                g.add_edge(chunk_in, chunked)?;
                resolve_file(g, chunk_in, Path::new(datum))?;
            }

            for (out_index, file_type) in meta.output_types.iter().enumerate() {
                let chunk_out = g.add_node(FileNode::ChunkOut {
                    task_id: meta.task_id.clone(),
                    instance_id,
                    index: out_index,
                    file_type: file_type.clone(),
                    chunk_id: chunk.chunk_id.clone(),
                });
                g.add_edge(chunked, chunk_out)?;
            }

            chunked_nodes.push(chunked);
            added_here += 1;
        }

        if let Some(attrs) = g.task_attrs_mut(scatter) {
            attrs.was_chunked = true;
        }
        log::info!("Added {} chunked tasks from {}", added_here, g.node(scatter));
    }

    Ok(chunked_nodes)
}

/// Chunked task nodes fed by a scatter node's manifest file
fn chunked_descendants(g: &BindingGraph, manifest_file: NodeIndex) -> Vec<NodeIndex> {
    let mut found = BTreeSet::new();
    for &chunk_in in g.successors(manifest_file) {
        if !matches!(g.node(chunk_in), Node::File(FileNode::ChunkIn { .. })) {
            continue;
        }
        for &t in g.successors(chunk_in) {
            if matches!(g.node(t), Node::Task(TaskNode::Chunked { .. })) {
                found.insert(t);
            }
        }
    }
    found.into_iter().collect()
}

/// Graft gather fan-ins once every chunked instance has succeeded
///
/// The scattered manifest is re-read, each chunked output path is merged
/// in under its gather chunk key, and the merged manifest is persisted to
/// the run directory. One gather node per gather spec is grafted with its
/// input resolved to the merged manifest; every chunked output file is
/// wired in as an additional predecessor of that input for topological
/// completeness. The graft is one-shot per scatter node. Returns the new
/// gather node indices.
pub fn gather_completed_chunks(
    g: &mut BindingGraph,
    operators: &OperatorRegistry,
    tasks: &TaskRegistry,
    ctx: &RunContext,
    chunk_io: &dyn ChunkIo,
) -> Result<Vec<NodeIndex>> {
    let candidates: Vec<NodeIndex> = g
        .node_indices()
        .filter(|&i| {
            matches!(g.node(i), Node::Task(TaskNode::Scatter { .. }))
                && g.task_attrs(i)
                    .map(|attrs| {
                        attrs.state == TaskState::Successful
                            && attrs.was_chunked
                            && !attrs.is_chunk_running
                    })
                    .unwrap_or(false)
        })
        .collect();

    let mut gather_nodes = Vec::new();
    for scatter in candidates {
        let scatter_task_id = match g.node(scatter) {
            Node::Task(TaskNode::Scatter { task_id, .. }) => task_id.clone(),
            _ => continue,
        };
        let operator = operators.find_by_scatter_task_id(&scatter_task_id)?;
        let (manifest_file, manifest_path) = scatter_manifest_file(g, scatter)?;

        let chunked = chunked_descendants(g, manifest_file);
        if chunked.is_empty() {
            continue;
        }
        if !chunked
            .iter()
            .all(|&t| was_task_successful_with_outputs(g, t))
        {
            // some shard is still pending or failed; try again next tick
            continue;
        }

        let scattered = chunk_io.load_chunks(&manifest_path)?;
        log::info!(
            "Loaded {} scattered pipeline chunks from {}",
            scattered.len(),
            manifest_path.display()
        );
        let mut merged: BTreeMap<String, PipelineChunk> = scattered
            .into_iter()
            .map(|c| (c.chunk_id.clone(), c))
            .collect();

        // {output slot index -> (chunk key, gather task id)}
        let mut gather_by_index: BTreeMap<usize, (String, TaskId)> = BTreeMap::new();
        for spec in &operator.gather.chunks {
            gather_by_index.insert(
                task_input_index(&spec.task_input)?,
                (spec.chunk_key.clone(), spec.gather_task_id.clone()),
            );
        }

        let mut chunk_out_nodes: Vec<NodeIndex> = Vec::new();
        for &t in &chunked {
            let chunk_id = match g.node(t) {
                Node::Task(TaskNode::Chunked { chunk_id, .. }) => chunk_id.clone(),
                _ => continue,
            };
            for &out in g.successors(t) {
                let index = match g.node(out) {
                    Node::File(file) => file.index(),
                    Node::Task(_) => continue,
                };
                let (chunk_key, _) = gather_by_index.get(&index).ok_or_else(|| {
                    BindingError::ChunkManifest(format!(
                        "no gather chunk key for output slot {} of {}",
                        index,
                        g.node(t)
                    ))
                })?;
                let path = g
                    .file_attrs(out)
                    .and_then(|attrs| attrs.path.clone())
                    .ok_or_else(|| {
                        BindingError::ChunkManifest(format!(
                            "chunked output {} is resolved without a path",
                            g.node(out)
                        ))
                    })?;
                let entry = merged.get_mut(&chunk_id).ok_or_else(|| {
                    BindingError::ChunkManifest(format!(
                        "chunk id '{}' is missing from the scattered manifest",
                        chunk_id
                    ))
                })?;
                entry
                    .datum
                    .insert(chunk_key.clone(), path.to_string_lossy().into_owned());
                chunk_out_nodes.push(out);
            }
        }

        let gathered_path = ctx.gathered_chunks_path();
        let comment = format!(
            "Gathered pipeline chunks for {}. Scattered from {}",
            g.node(scatter),
            manifest_path.display()
        );
        let merged_chunks: Vec<PipelineChunk> = merged.into_values().collect();
        chunk_io.write_chunks(&merged_chunks, &gathered_path, &comment)?;

        for (gather_index, spec) in operator.gather.chunks.iter().enumerate() {
            let gather_meta = tasks.get_or_err(&spec.gather_task_id)?;
            let (in_type, out_type) = match (
                gather_meta.input_types.first(),
                gather_meta.output_types.first(),
            ) {
                (Some(in_type), Some(out_type)) => (in_type.clone(), out_type.clone()),
                _ => {
                    return Err(BindingError::MalformedBinding(format!(
                        "gather task '{}' must declare one input and one output",
                        gather_meta.task_id
                    )));
                }
            };

            let gather = g.add_node(TaskNode::Gather {
                task_id: gather_meta.task_id.clone(),
                gather_index: gather_index as u32,
                chunk_key: spec.chunk_key.clone(),
            });
            let gather_in = g.add_node(FileNode::In {
                task_id: gather_meta.task_id.clone(),
                instance_id: gather_index as u32,
                index: 0,
                file_type: in_type,
            });
            let gather_out = g.add_node(FileNode::Out {
                task_id: gather_meta.task_id.clone(),
                instance_id: gather_index as u32,
                index: 0,
                file_type: out_type,
            });

            resolve_file(g, gather_in, &gathered_path)?;
            g.add_edge(gather_in, gather)?;
            g.add_edge(gather, gather_out)?;
            // completeness edges: the gather reads the merged manifest, but
            // topologically it follows every chunked output
            for &out in &chunk_out_nodes {
                g.add_edge(out, gather_in)?;
            }

            gather_nodes.push(gather);
        }

        if let Some(attrs) = g.task_attrs_mut(scatter) {
            attrs.is_chunk_running = true;
        }
        log::debug!("Gather grafted for {}", g.node(scatter));
    }

    Ok(gather_nodes)
}
