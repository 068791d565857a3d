//! Structural and type-compatibility validation for binding graphs
//!
//! Both validators are pure reads. The builder runs them after assembly;
//! they are fatal there, and safe to re-run at any later point.

use crate::error::{BindingError, Result};
use crate::graph::BindingGraph;
use crate::nodes::{FileNode, Node, TaskNode};
use crate::registry::TaskRegistry;

/// Check for dangling or over-bound task inputs
///
/// Every predecessor of a task-like node is an input-file node with
/// in-degree exactly 1 (its producer, or the entry chain feeding it).
/// In-degree 0 is a dangling input; in-degree above 1 is an over-bound
/// input. Gather in-files are exempt: they aggregate every chunked output
/// as completeness predecessors.
pub fn validate_integrity(g: &BindingGraph) -> Result<()> {
    for t in g.task_nodes()? {
        if matches!(g.node(t), Node::Task(TaskNode::Gather { .. })) {
            continue;
        }
        for &f in g.predecessors(t) {
            let in_degree = g.in_degree(f);
            match in_degree {
                1 => {}
                0 => {
                    // only the entry chain may stand upstream unfed
                    if !matches!(g.node(f), Node::File(FileNode::EntryOut { .. })) {
                        return Err(BindingError::graph(format!(
                            "dangling input {} of task {}",
                            g.node(f),
                            g.node(t)
                        )));
                    }
                }
                _ => {
                    return Err(BindingError::graph(format!(
                        "invalid in-degree {} of input {} of task {}",
                        in_degree,
                        g.node(f),
                        g.node(t)
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Check that every bound file carries the consumer's declared file type
///
/// For each ordinary task input: the input-file node's type must equal the
/// catalog's declared type at that position, and so must the type of any
/// upstream producer file.
pub fn validate_file_types(g: &BindingGraph, registry: &TaskRegistry) -> Result<()> {
    for t in g.task_nodes()? {
        let task_id = match g.node(t) {
            Node::Task(TaskNode::Task { task_id, .. }) => task_id,
            _ => continue,
        };
        let meta = registry.get_or_err(task_id)?;

        for &f in g.predecessors(t) {
            let file = match g.node(f) {
                Node::File(file) => file,
                Node::Task(_) => continue,
            };
            let index = file.index();
            let expected = match meta.input_types.get(index) {
                Some(expected) => expected,
                None => {
                    return Err(BindingError::graph(format!(
                        "input slot {} of task {} exceeds declared arity {}",
                        index,
                        g.node(t),
                        meta.input_arity()
                    )));
                }
            };

            if file.file_type() != expected {
                let msg = format!(
                    "task {} expected type {} at input {}, got {}",
                    g.node(t),
                    expected.file_type_id,
                    index,
                    file.file_type().file_type_id
                );
                log::error!("{}", msg);
                return Err(BindingError::BindingFileTypeIncompatible(msg));
            }

            for &p in g.predecessors(f) {
                if let Node::File(producer) = g.node(p) {
                    if producer.file_type() != expected {
                        let msg = format!(
                            "task {} expected type {} at input {}, producer {} has type {}",
                            g.node(t),
                            expected.file_type_id,
                            index,
                            g.node(p),
                            producer.file_type().file_type_id
                        );
                        log::error!("{}", msg);
                        return Err(BindingError::BindingFileTypeIncompatible(msg));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{FileNode, TaskNode};
    use crate::types::{FileType, MetaTask};

    fn txt() -> FileType {
        FileType::new("pipewright.files.txt", "file", "txt")
    }

    fn gff() -> FileType {
        FileType::new("pipewright.files.gff", "features", "gff")
    }

    fn registry_with(meta: MetaTask) -> TaskRegistry {
        vec![meta].into_iter().collect()
    }

    #[test]
    fn test_integrity_accepts_fed_input() {
        let mut g = BindingGraph::new();
        let o = g.add_node(FileNode::Out {
            task_id: "pipewright.tasks.up".to_string(),
            instance_id: 0,
            index: 0,
            file_type: txt(),
        });
        let i = g.add_node(FileNode::In {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
            index: 0,
            file_type: txt(),
        });
        let t = g.add_node(TaskNode::Task {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
        });
        g.add_edge(o, i).unwrap();
        g.add_edge(i, t).unwrap();
        assert!(validate_integrity(&g).is_ok());
    }

    #[test]
    fn test_integrity_rejects_dangling_input() {
        let mut g = BindingGraph::new();
        let i = g.add_node(FileNode::In {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
            index: 0,
            file_type: txt(),
        });
        let t = g.add_node(TaskNode::Task {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
        });
        g.add_edge(i, t).unwrap();
        let err = validate_integrity(&g).unwrap_err();
        assert!(matches!(err, BindingError::MalformedBindingGraph(_)));
    }

    #[test]
    fn test_integrity_rejects_over_bound_input() {
        let mut g = BindingGraph::new();
        let o1 = g.add_node(FileNode::Out {
            task_id: "pipewright.tasks.a".to_string(),
            instance_id: 0,
            index: 0,
            file_type: txt(),
        });
        let o2 = g.add_node(FileNode::Out {
            task_id: "pipewright.tasks.b".to_string(),
            instance_id: 0,
            index: 0,
            file_type: txt(),
        });
        let i = g.add_node(FileNode::In {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
            index: 0,
            file_type: txt(),
        });
        let t = g.add_node(TaskNode::Task {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
        });
        g.add_edge(o1, i).unwrap();
        g.add_edge(o2, i).unwrap();
        g.add_edge(i, t).unwrap();
        let err = validate_integrity(&g).unwrap_err();
        assert!(matches!(err, BindingError::MalformedBindingGraph(_)));
    }

    #[test]
    fn test_file_types_rejects_mismatched_producer() {
        let meta = MetaTask::new("pipewright.tasks.t1", vec![gff()], vec![]);
        let mut g = BindingGraph::new();
        let producer = g.add_node(FileNode::Out {
            task_id: "pipewright.tasks.up".to_string(),
            instance_id: 0,
            index: 0,
            file_type: txt(),
        });
        let i = g.add_node(FileNode::In {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
            index: 0,
            file_type: gff(),
        });
        let t = g.add_node(TaskNode::Task {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
        });
        g.add_edge(producer, i).unwrap();
        g.add_edge(i, t).unwrap();

        let err = validate_file_types(&g, &registry_with(meta)).unwrap_err();
        assert!(matches!(err, BindingError::BindingFileTypeIncompatible(_)));
    }

    #[test]
    fn test_file_types_rejects_mismatched_slot() {
        let meta = MetaTask::new("pipewright.tasks.t1", vec![gff()], vec![]);
        let mut g = BindingGraph::new();
        let i = g.add_node(FileNode::In {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
            index: 0,
            file_type: txt(),
        });
        let t = g.add_node(TaskNode::Task {
            task_id: "pipewright.tasks.t1".to_string(),
            instance_id: 0,
        });
        // feed the input so integrity-style shape is plausible
        let producer = g.add_node(FileNode::Out {
            task_id: "pipewright.tasks.up".to_string(),
            instance_id: 0,
            index: 0,
            file_type: txt(),
        });
        g.add_edge(producer, i).unwrap();
        g.add_edge(i, t).unwrap();

        let err = validate_file_types(&g, &registry_with(meta)).unwrap_err();
        assert!(matches!(err, BindingError::BindingFileTypeIncompatible(_)));
    }
}
