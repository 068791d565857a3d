//! Assemble a binding graph from textual binding tuples
//!
//! This is the only supported way to construct a `BindingGraph`. Bindings
//! are deduplicated set-wise, both ends are parsed and resolved against the
//! task catalog, and every touched task gets all of its declared io slots
//! materialized eagerly so that the structural invariants hold even when a
//! binding only names one of several inputs.

use std::collections::BTreeSet;

use crate::error::{BindingError, Result};
use crate::graph::{BindingGraph, NodeIndex};
use crate::nodes::{FileNode, TaskNode};
use crate::parser::{parse_binding_ref, parse_task_ref, BindingRef};
use crate::registry::TaskRegistry;
use crate::types::{FileType, MetaTask};
use crate::validation::{validate_file_types, validate_integrity};

/// A binding tuple: (producer expression, consumer expression)
pub type Binding = (String, String);

fn input_type_at(meta: &MetaTask, index: usize) -> Result<&FileType> {
    meta.input_types
        .get(index)
        .ok_or_else(|| BindingError::IndexOutOfRange {
            task_id: meta.task_id.clone(),
            io: "input",
            index,
            max_index: meta.input_arity().saturating_sub(1),
        })
}

fn output_type_at(meta: &MetaTask, index: usize) -> Result<&FileType> {
    meta.output_types
        .get(index)
        .ok_or_else(|| BindingError::IndexOutOfRange {
            task_id: meta.task_id.clone(),
            io: "output",
            index,
            max_index: meta.output_arity().saturating_sub(1),
        })
}

/// Materialize a task node together with every declared io slot
///
/// Inputs are wired file -> task, outputs task -> file. Re-materializing an
/// existing task is a no-op thanks to node and edge deduplication.
fn materialize_task_io(g: &mut BindingGraph, meta: &MetaTask, instance_id: u32) -> Result<NodeIndex> {
    let t = g.add_node(TaskNode::Task {
        task_id: meta.task_id.clone(),
        instance_id,
    });
    for (i, file_type) in meta.input_types.iter().enumerate() {
        let f = g.add_node(FileNode::In {
            task_id: meta.task_id.clone(),
            instance_id,
            index: i,
            file_type: file_type.clone(),
        });
        g.add_edge(f, t)?;
    }
    for (j, file_type) in meta.output_types.iter().enumerate() {
        let f = g.add_node(FileNode::Out {
            task_id: meta.task_id.clone(),
            instance_id,
            index: j,
            file_type: file_type.clone(),
        });
        g.add_edge(t, f)?;
    }
    Ok(t)
}

/// Build a validated binding graph from a task catalog and binding tuples
///
/// Build-time errors are fatal: no partial graph is returned.
pub fn build_binding_graph(registry: &TaskRegistry, bindings: &[Binding]) -> Result<BindingGraph> {
    // set-wise dedup; ordered so the resulting graph is deterministic
    let unique: BTreeSet<&Binding> = bindings.iter().collect();

    let mut g = BindingGraph::new();

    for (out_expr, in_expr) in unique {
        let (in_task_id, in_instance, in_index) = parse_task_ref(in_expr)?;
        let in_meta = registry.get_or_err(&in_task_id)?;
        let in_type = input_type_at(in_meta, in_index)?.clone();

        materialize_task_io(&mut g, in_meta, in_instance)?;
        let in_file = g
            .node_index(
                &FileNode::In {
                    task_id: in_task_id.clone(),
                    instance_id: in_instance,
                    index: in_index,
                    file_type: in_type.clone(),
                }
                .into(),
            )
            .ok_or_else(|| BindingError::graph("input slot missing after materialization"))?;

        let out_file = match parse_binding_ref(out_expr)? {
            BindingRef::Entry { entry_id } => {
                // the entry point adopts the consuming task's input type
                let ep = g.add_node(TaskNode::EntryPoint {
                    entry_id: entry_id.clone(),
                    file_type: in_type.clone(),
                });
                let eo = g.add_node(FileNode::EntryOut {
                    entry_id,
                    file_type: in_type.clone(),
                });
                g.add_edge(ep, eo)?;
                eo
            }
            BindingRef::TaskIo {
                task_id: out_task_id,
                instance_id: out_instance,
                index: out_index,
            } => {
                let out_meta = registry.get_or_err(&out_task_id)?;
                let out_type = output_type_at(out_meta, out_index)?.clone();
                materialize_task_io(&mut g, out_meta, out_instance)?;
                g.node_index(
                    &FileNode::Out {
                        task_id: out_task_id,
                        instance_id: out_instance,
                        index: out_index,
                        file_type: out_type,
                    }
                    .into(),
                )
                .ok_or_else(|| BindingError::graph("output slot missing after materialization"))?
            }
        };

        // the producer's file floods its path to the consumer over this edge
        g.add_edge(out_file, in_file)?;

        log::debug!("Bound {} -> {}", out_expr, in_expr);
    }

    validate_integrity(&g)?;
    validate_file_types(&g, registry)?;

    log::info!("Built binding graph {}", g);
    Ok(g)
}
