//! Immutable catalogs consumed by the engine
//!
//! `TaskRegistry` maps task ids to their metadata; `OperatorRegistry` maps
//! operator ids to chunk operators. Both are populated up front and read
//! by the builder, the validators, and the scatter/gather rewriter.

use std::collections::HashMap;

use crate::chunk::ChunkOperator;
use crate::error::{BindingError, Result};
use crate::types::{MetaTask, OperatorId, TaskId};

/// Registry of task metadata, keyed by task id
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, MetaTask>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, replacing any previous entry with the same id
    pub fn register(&mut self, meta: MetaTask) {
        self.tasks.insert(meta.task_id.clone(), meta);
    }

    /// Get metadata for a task id
    pub fn get(&self, task_id: &str) -> Option<&MetaTask> {
        self.tasks.get(task_id)
    }

    /// Get metadata for a task id, or fail with `TaskIdNotFound`
    pub fn get_or_err(&self, task_id: &str) -> Result<&MetaTask> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| BindingError::TaskIdNotFound(task_id.to_string()))
    }

    /// Whether a task id is registered
    pub fn has_task(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// All registered task ids, sorted
    pub fn task_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tasks.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries with the same task id.
    pub fn merge(&mut self, other: TaskRegistry) {
        self.tasks.extend(other.tasks);
    }
}

impl FromIterator<MetaTask> for TaskRegistry {
    fn from_iter<I: IntoIterator<Item = MetaTask>>(iter: I) -> Self {
        let mut registry = Self::new();
        for meta in iter {
            registry.register(meta);
        }
        registry
    }
}

/// Registry of chunk operators, keyed by operator id
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<OperatorId, ChunkOperator>,
}

impl OperatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator, replacing any previous entry with the same id
    pub fn register(&mut self, operator: ChunkOperator) {
        self.operators
            .insert(operator.operator_id.clone(), operator);
    }

    /// Get an operator by id
    pub fn get(&self, operator_id: &str) -> Option<&ChunkOperator> {
        self.operators.get(operator_id)
    }

    /// Find the operator whose scatter companion is `scatter_task_id`
    pub fn find_by_scatter_task_id(&self, scatter_task_id: &str) -> Result<&ChunkOperator> {
        self.operators
            .values()
            .find(|op| op.scatter.scatter_task_id == scatter_task_id)
            .ok_or_else(|| BindingError::OperatorNotFound(scatter_task_id.to_string()))
    }

    /// Iterate over (operator id, operator) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&OperatorId, &ChunkOperator)> {
        self.operators.iter()
    }

    /// Number of registered operators
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl FromIterator<ChunkOperator> for OperatorRegistry {
    fn from_iter<I: IntoIterator<Item = ChunkOperator>>(iter: I) -> Self {
        let mut registry = Self::new();
        for op in iter {
            registry.register(op);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{GatherChunkSpec, GatherSpec, ScatterChunkSpec, ScatterSpec};
    use crate::types::FileType;

    fn test_meta(task_id: &str) -> MetaTask {
        let ft = FileType::new("pipewright.files.txt", "file", "txt");
        MetaTask::new(task_id, vec![ft.clone()], vec![ft])
    }

    fn test_operator(operator_id: &str, task_id: &str, scatter_task_id: &str) -> ChunkOperator {
        ChunkOperator {
            operator_id: operator_id.to_string(),
            scatter: ScatterSpec {
                task_id: task_id.to_string(),
                scatter_task_id: scatter_task_id.to_string(),
                chunks: vec![ScatterChunkSpec {
                    chunk_key: "$chunk.txt_id".to_string(),
                    task_input: format!("{}:0", task_id),
                }],
            },
            gather: GatherSpec {
                chunks: vec![GatherChunkSpec {
                    chunk_key: "$chunk.out_id".to_string(),
                    gather_task_id: "pipewright.tasks.gather_txt".to_string(),
                    task_input: format!("{}:0", task_id),
                }],
            },
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TaskRegistry::new();
        registry.register(test_meta("pipewright.tasks.t1"));

        assert!(registry.has_task("pipewright.tasks.t1"));
        assert!(!registry.has_task("pipewright.tasks.unknown"));
        assert!(registry.get_or_err("pipewright.tasks.t1").is_ok());
    }

    #[test]
    fn test_unknown_task_id() {
        let registry = TaskRegistry::new();
        let err = registry.get_or_err("pipewright.tasks.missing").unwrap_err();
        assert!(matches!(err, BindingError::TaskIdNotFound(_)));
    }

    #[test]
    fn test_merge_overrides() {
        let mut a = TaskRegistry::new();
        a.register(test_meta("pipewright.tasks.t1"));

        let mut b = TaskRegistry::new();
        let mut meta = test_meta("pipewright.tasks.t1");
        meta.nproc = 8;
        b.register(meta);
        b.register(test_meta("pipewright.tasks.t2"));

        a.merge(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get("pipewright.tasks.t1").unwrap().nproc, 8);
    }

    #[test]
    fn test_find_operator_by_scatter_task_id() {
        let registry: OperatorRegistry = vec![test_operator(
            "pipewright.operators.scatter_t1",
            "pipewright.tasks.t1",
            "pipewright.tasks.scatter_t1",
        )]
        .into_iter()
        .collect();

        let op = registry
            .find_by_scatter_task_id("pipewright.tasks.scatter_t1")
            .unwrap();
        assert_eq!(op.operator_id, "pipewright.operators.scatter_t1");

        let err = registry
            .find_by_scatter_task_id("pipewright.tasks.nope")
            .unwrap_err();
        assert!(matches!(err, BindingError::OperatorNotFound(_)));
    }
}
