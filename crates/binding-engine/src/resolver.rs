//! Incremental state resolution over a binding graph
//!
//! The resolver owns the answers to "what runs next?" and "is the workflow
//! done?". It advances task states, marks file slots resolved, and floods
//! resolved paths one hop downstream after every resolution. All functions
//! mutate the graph synchronously under the single scheduler's ownership;
//! worker outcomes are applied here, never by the workers themselves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{BindingError, Result};
use crate::graph::{BindingGraph, NodeIndex};
use crate::io::FileSystemProbe;
use crate::nodes::{Node, TaskNode};
use crate::parser::strip_entry_prefix;
use crate::types::TaskState;

/// Outcome of a success transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SuccessResolution {
    /// The task transitioned to `Successful` and its outputs resolved
    Resolved,
    /// An output file was missing on disk; the task was left untouched.
    /// The scheduler is expected to fail the task with this message.
    MissingOutput(String),
}

impl SuccessResolution {
    /// Whether the transition went through
    pub fn is_resolved(&self) -> bool {
        matches!(self, SuccessResolution::Resolved)
    }
}

/// Mark a file slot resolved to a path
///
/// Resolution is monotonic: the first write wins, later calls are no-ops.
pub fn resolve_file(g: &mut BindingGraph, f: NodeIndex, path: &Path) -> Result<()> {
    if g.file_attrs(f).is_none() {
        return Err(BindingError::graph(format!(
            "unable to resolve non-file node {}",
            g.node(f)
        )));
    }
    if let Some(attrs) = g.file_attrs_mut(f) {
        if attrs.path.is_none() {
            attrs.path = Some(path.to_path_buf());
            attrs.resolved_at = Some(Utc::now());
            attrs.is_resolved = true;
        }
    }
    Ok(())
}

/// Flood resolved paths along file-to-file edges
///
/// Every resolved file with a path hands the same `(path, resolved)` pair
/// to its direct file successors. Idempotent; repeated calls change
/// nothing.
pub fn propagate_resolved_paths(g: &mut BindingGraph) -> Result<()> {
    for f in g.file_nodes()? {
        let (is_resolved, path) = match g.file_attrs(f) {
            Some(attrs) => (attrs.is_resolved, attrs.path.clone()),
            None => continue,
        };
        if is_resolved && path.is_none() {
            log::warn!("Resolved file {} has no path defined", g.node(f));
        }
        let path = match (is_resolved, path) {
            (true, Some(path)) => path,
            _ => continue,
        };
        let successors: Vec<NodeIndex> = g.successors(f).to_vec();
        for s in successors {
            if matches!(g.node(s), Node::File(_)) {
                resolve_file(g, s, &path)?;
            }
        }
    }
    Ok(())
}

/// Resolve one entry point to a concrete path
///
/// The entry-point node transitions to `Successful` (it behaves like a
/// zero-cost task), its entry-out file resolves to `path`, and the path
/// floods to the consuming input slots.
pub fn resolve_entry_point(g: &mut BindingGraph, entry_id: &str, path: &Path) -> Result<()> {
    let eid = strip_entry_prefix(entry_id);

    let matching: Vec<NodeIndex> = g
        .entry_point_nodes()
        .into_iter()
        .filter(|&i| matches!(g.node(i), Node::Task(TaskNode::EntryPoint { entry_id, .. }) if entry_id == eid))
        .collect();

    if matching.is_empty() {
        let mut valid_ids: Vec<String> = g
            .entry_point_nodes()
            .into_iter()
            .filter_map(|i| match g.node(i) {
                Node::Task(TaskNode::EntryPoint { entry_id, .. }) => Some(entry_id.clone()),
                _ => None,
            })
            .collect();
        valid_ids.sort();
        valid_ids.dedup();
        return Err(BindingError::InvalidEntryPoint {
            entry_id: eid.to_string(),
            valid_ids,
        });
    }

    for ep in matching {
        if let Some(attrs) = g.task_attrs_mut(ep) {
            attrs.state = TaskState::Successful;
            attrs.run_time_sec = Some(0.0);
        }
        let out_files: Vec<NodeIndex> = g.successors(ep).to_vec();
        log::info!(
            "Resolving entry point '{}' to {} ({} outputs)",
            eid,
            path.display(),
            out_files.len()
        );
        for f in out_files {
            resolve_file(g, f, path)?;
        }
    }

    propagate_resolved_paths(g)
}

/// Resolve a set of entry points from an id -> path map
pub fn resolve_entry_points(g: &mut BindingGraph, entries: &BTreeMap<String, PathBuf>) -> Result<()> {
    for (entry_id, path) in entries {
        resolve_entry_point(g, entry_id, path)?;
    }
    Ok(())
}

/// Whether this node is a concrete executable the scheduler may pick
///
/// Entry points never run; an ordinary task superseded by a scatter graft
/// (`was_chunked`) is skipped because its chunked siblings supply the
/// gathered outputs.
fn is_schedulable_node(g: &BindingGraph, t: NodeIndex) -> bool {
    match g.node(t) {
        Node::Task(TaskNode::Task { .. }) => g
            .task_attrs(t)
            .map(|attrs| !attrs.was_chunked)
            .unwrap_or(false),
        Node::Task(
            TaskNode::Scatter { .. } | TaskNode::Chunked { .. } | TaskNode::Gather { .. },
        ) => true,
        _ => false,
    }
}

/// Select the next runnable task, if any
///
/// A task is runnable when its state admits scheduling and every
/// predecessor file slot is resolved. Candidates are visited in
/// topological order, so the choice is deterministic for a given
/// insertion order.
pub fn next_runnable(g: &BindingGraph) -> Result<Option<NodeIndex>> {
    if is_workflow_complete(g) {
        return Ok(None);
    }

    for t in g.task_nodes()? {
        if !is_schedulable_node(g, t) {
            continue;
        }
        let schedulable = g
            .task_attrs(t)
            .map(|attrs| attrs.state.is_schedulable())
            .unwrap_or(false);
        if !schedulable {
            continue;
        }
        let inputs_resolved = g.predecessors(t).iter().all(|&f| {
            g.file_attrs(f)
                .map(|attrs| attrs.is_resolved)
                .unwrap_or(false)
        });
        if inputs_resolved {
            return Ok(Some(t));
        }
    }

    log::debug!("Unable to find a runnable task");
    Ok(None)
}

/// Whether another task could be scheduled right now
pub fn has_next_runnable_task(g: &BindingGraph) -> Result<bool> {
    Ok(next_runnable(g)?.is_some())
}

/// Whether the workflow is complete
///
/// Every task-like node must be in a terminal state and every file slot
/// resolved.
pub fn is_workflow_complete(g: &BindingGraph) -> bool {
    for i in g.node_indices() {
        if let Some(attrs) = g.task_attrs(i) {
            if !attrs.state.is_completed() {
                return false;
            }
        }
        if let Some(attrs) = g.file_attrs(i) {
            if !attrs.is_resolved {
                return false;
            }
        }
    }
    true
}

/// Whether every task-like node finished successfully
pub fn was_workflow_successful(g: &BindingGraph) -> bool {
    g.node_indices().all(|i| match g.task_attrs(i) {
        Some(attrs) => attrs.state == TaskState::Successful,
        None => true,
    })
}

/// Whether a task-like node is in the `Successful` state
pub fn was_task_successful(g: &BindingGraph, t: NodeIndex) -> bool {
    g.task_attrs(t)
        .map(|attrs| attrs.state == TaskState::Successful)
        .unwrap_or(false)
}

/// Whether a task succeeded and every one of its output slots is resolved
pub fn was_task_successful_with_outputs(g: &BindingGraph, t: NodeIndex) -> bool {
    if !was_task_successful(g, t) {
        return false;
    }
    g.successors(t).iter().all(|&f| {
        g.file_attrs(f)
            .map(|attrs| attrs.is_resolved)
            .unwrap_or(true)
    })
}

/// Task-like nodes currently in any of the given states, insertion order
pub fn tasks_by_state(g: &BindingGraph, states: &[TaskState]) -> Vec<NodeIndex> {
    g.node_indices()
        .filter(|&i| {
            g.task_attrs(i)
                .map(|attrs| states.contains(&attrs.state))
                .unwrap_or(false)
        })
        .collect()
}

/// Whether no task remains in a schedulable state
pub fn are_all_tasks_running(g: &BindingGraph) -> bool {
    tasks_by_state(g, &[TaskState::Created, TaskState::Ready]).is_empty()
}

/// Whether any task is currently running
pub fn has_running_task(g: &BindingGraph) -> bool {
    !tasks_by_state(g, &[TaskState::Running]).is_empty()
}

/// Input paths of a task, ordered by input slot index
pub fn task_input_files(g: &BindingGraph, t: NodeIndex) -> Vec<Option<PathBuf>> {
    let mut files: Vec<(usize, Option<PathBuf>)> = g
        .predecessors(t)
        .iter()
        .filter_map(|&f| match g.node(f) {
            Node::File(file) => Some((
                file.index(),
                g.file_attrs(f).and_then(|attrs| attrs.path.clone()),
            )),
            Node::Task(_) => None,
        })
        .collect();
    files.sort_by_key(|(index, _)| *index);
    files.into_iter().map(|(_, path)| path).collect()
}

/// Transition a task to a new state
///
/// Transitions between non-terminal states are unrestricted; terminal
/// states never revert. Re-asserting the current state is a no-op.
pub fn update_task_state(g: &mut BindingGraph, t: NodeIndex, state: TaskState) -> Result<()> {
    let current = g
        .task_attrs(t)
        .map(|attrs| attrs.state)
        .ok_or_else(|| BindingError::graph(format!("node {} is not task-like", g.node(t))))?;

    if current == state {
        return Ok(());
    }
    if current.is_completed() {
        return Err(BindingError::InvalidTaskState(format!(
            "{} cannot leave terminal state {:?} for {:?}",
            g.node(t),
            current,
            state
        )));
    }
    if let Some(attrs) = g.task_attrs_mut(t) {
        attrs.state = state;
    }
    Ok(())
}

/// Validate outputs and transition a task to `Successful`
///
/// Every supplied output path is checked against the filesystem probe and
/// every declared output slot must have a path at its index. On any miss
/// the task is left untouched and the message is handed back to the
/// scheduler. On success, output slots resolve to their paths and the
/// resolution floods downstream. Calling again after a successful
/// transition is a no-op.
pub fn mark_task_success(
    g: &mut BindingGraph,
    t: NodeIndex,
    run_time_sec: f64,
    output_files: &[PathBuf],
    probe: &dyn FileSystemProbe,
) -> Result<SuccessResolution> {
    let current = g
        .task_attrs(t)
        .map(|attrs| attrs.state)
        .ok_or_else(|| BindingError::graph(format!("node {} is not task-like", g.node(t))))?;
    if current == TaskState::Successful {
        return Ok(SuccessResolution::Resolved);
    }

    for path in output_files {
        if !probe.exists(path) {
            let msg = format!(
                "Task {} failed to validate output file '{}'",
                g.node(t),
                path.display()
            );
            log::warn!("{}", msg);
            return Ok(SuccessResolution::MissingOutput(msg));
        }
    }

    // (file node, slot index) pairs collected up front to keep borrows simple
    let mut slots: Vec<(NodeIndex, usize)> = Vec::new();
    for &f in g.successors(t) {
        if let Node::File(file) = g.node(f) {
            let index = file.index();
            if index >= output_files.len() {
                let msg = format!(
                    "Task {} supplied no path for output slot {}",
                    g.node(t),
                    index
                );
                log::warn!("{}", msg);
                return Ok(SuccessResolution::MissingOutput(msg));
            }
            slots.push((f, index));
        }
    }

    update_task_state(g, t, TaskState::Successful)?;
    if let Some(attrs) = g.task_attrs_mut(t) {
        attrs.run_time_sec = Some(run_time_sec);
    }
    for (f, index) in slots {
        let path = output_files[index].clone();
        resolve_file(g, f, &path)?;
    }
    propagate_resolved_paths(g)?;
    Ok(SuccessResolution::Resolved)
}

/// Transition a task to `Failed`, recording runtime and the error message
pub fn mark_task_failed(
    g: &mut BindingGraph,
    t: NodeIndex,
    run_time_sec: f64,
    message: impl Into<String>,
) -> Result<()> {
    update_task_state(g, t, TaskState::Failed)?;
    let message = message.into();
    log::error!("Task {} failed: {}", g.node(t), message);
    if let Some(attrs) = g.task_attrs_mut(t) {
        attrs.run_time_sec = Some(run_time_sec);
        attrs.error_message = Some(message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_binding_graph;
    use crate::nodes::TaskNode;
    use crate::registry::TaskRegistry;
    use crate::types::{FileType, MetaTask};

    struct AlwaysExists;
    impl FileSystemProbe for AlwaysExists {
        fn exists(&self, _path: &Path) -> bool {
            true
        }
    }

    struct NeverExists;
    impl FileSystemProbe for NeverExists {
        fn exists(&self, _path: &Path) -> bool {
            false
        }
    }

    fn txt() -> FileType {
        FileType::new("pipewright.files.txt", "file", "txt")
    }

    fn registry() -> TaskRegistry {
        vec![
            MetaTask::new("pipewright.tasks.t1", vec![txt()], vec![txt()]),
            MetaTask::new("pipewright.tasks.t2", vec![txt()], vec![txt()]),
        ]
        .into_iter()
        .collect()
    }

    fn linear_graph() -> BindingGraph {
        build_binding_graph(
            &registry(),
            &[
                ("$entry:e1".to_string(), "pipewright.tasks.t1:0".to_string()),
                (
                    "pipewright.tasks.t1:0".to_string(),
                    "pipewright.tasks.t2:0".to_string(),
                ),
            ],
        )
        .unwrap()
    }

    fn task_node(g: &BindingGraph, task_id: &str) -> NodeIndex {
        g.node_index(
            &TaskNode::Task {
                task_id: task_id.to_string(),
                instance_id: 0,
            }
            .into(),
        )
        .unwrap()
    }

    #[test]
    fn test_linear_pipeline_end_to_end() {
        let mut g = linear_graph();

        // nothing is runnable before the entry resolves
        assert_eq!(next_runnable(&g).unwrap(), None);

        resolve_entry_point(&mut g, "e1", Path::new("/p/in")).unwrap();
        let t1 = task_node(&g, "pipewright.tasks.t1");
        let t2 = task_node(&g, "pipewright.tasks.t2");
        assert_eq!(next_runnable(&g).unwrap(), Some(t1));

        let outcome =
            mark_task_success(&mut g, t1, 1.0, &[PathBuf::from("/p/t1.out")], &AlwaysExists)
                .unwrap();
        assert!(outcome.is_resolved());
        assert_eq!(next_runnable(&g).unwrap(), Some(t2));

        mark_task_success(&mut g, t2, 1.0, &[PathBuf::from("/p/t2.out")], &AlwaysExists)
            .unwrap();
        assert!(is_workflow_complete(&g));
        assert!(was_workflow_successful(&g));
        assert_eq!(next_runnable(&g).unwrap(), None);
    }

    #[test]
    fn test_missing_output_bounces_to_failed() {
        let mut g = linear_graph();
        resolve_entry_point(&mut g, "e1", Path::new("/p/in")).unwrap();
        let t1 = task_node(&g, "pipewright.tasks.t1");

        let outcome =
            mark_task_success(&mut g, t1, 1.0, &[PathBuf::from("/missing")], &NeverExists)
                .unwrap();
        let message = match outcome {
            SuccessResolution::MissingOutput(message) => message,
            SuccessResolution::Resolved => panic!("expected a missing output"),
        };
        // the task is left untouched; the scheduler fails it
        assert_eq!(g.task_attrs(t1).unwrap().state, TaskState::Created);
        mark_task_failed(&mut g, t1, 1.0, message).unwrap();

        assert_eq!(g.task_attrs(t1).unwrap().state, TaskState::Failed);
        assert_eq!(next_runnable(&g).unwrap(), None);
        assert!(!is_workflow_complete(&g));
        assert!(!was_workflow_successful(&g));
    }

    #[test]
    fn test_entry_prefix_slop_accepted() {
        let mut g = linear_graph();
        resolve_entry_point(&mut g, "$entry:e1", Path::new("/p/in")).unwrap();
        let t1 = task_node(&g, "pipewright.tasks.t1");
        assert_eq!(next_runnable(&g).unwrap(), Some(t1));
    }

    #[test]
    fn test_unknown_entry_point_rejected() {
        let mut g = linear_graph();
        let err = resolve_entry_point(&mut g, "nope", Path::new("/p/in")).unwrap_err();
        match err {
            BindingError::InvalidEntryPoint { entry_id, valid_ids } => {
                assert_eq!(entry_id, "nope");
                assert_eq!(valid_ids, vec!["e1".to_string()]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_resolution_is_monotonic() {
        let mut g = linear_graph();
        resolve_entry_point(&mut g, "e1", Path::new("/p/first")).unwrap();

        let entry_out = g.entry_out_nodes()[0];
        let first = g.file_attrs(entry_out).unwrap().clone();
        assert!(first.is_resolved);
        assert_eq!(first.path.as_deref(), Some(Path::new("/p/first")));

        // a second resolution does not move the path or the timestamp
        resolve_file(&mut g, entry_out, Path::new("/p/second")).unwrap();
        let second = g.file_attrs(entry_out).unwrap();
        assert_eq!(second.path, first.path);
        assert_eq!(second.resolved_at, first.resolved_at);
    }

    #[test]
    fn test_runnable_soundness() {
        let mut g = linear_graph();
        resolve_entry_point(&mut g, "e1", Path::new("/p/in")).unwrap();

        // whatever is returned must have fully resolved predecessors
        while let Some(t) = next_runnable(&g).unwrap() {
            for &f in g.predecessors(t) {
                assert!(g.file_attrs(f).unwrap().is_resolved);
            }
            mark_task_success(&mut g, t, 0.1, &[PathBuf::from("/p/out")], &AlwaysExists)
                .unwrap();
        }
        assert!(is_workflow_complete(&g));
    }

    #[test]
    fn test_terminal_states_do_not_revert() {
        let mut g = linear_graph();
        let t1 = task_node(&g, "pipewright.tasks.t1");
        mark_task_failed(&mut g, t1, 0.5, "boom").unwrap();

        let err = update_task_state(&mut g, t1, TaskState::Ready).unwrap_err();
        assert!(matches!(err, BindingError::InvalidTaskState(_)));
        // re-asserting the terminal state is fine
        update_task_state(&mut g, t1, TaskState::Failed).unwrap();
    }

    #[test]
    fn test_mark_success_is_idempotent_after_success() {
        let mut g = linear_graph();
        resolve_entry_point(&mut g, "e1", Path::new("/p/in")).unwrap();
        let t1 = task_node(&g, "pipewright.tasks.t1");

        mark_task_success(&mut g, t1, 1.0, &[PathBuf::from("/p/a")], &AlwaysExists).unwrap();
        let run_time = g.task_attrs(t1).unwrap().run_time_sec;

        // second call is a no-op even with different arguments
        let outcome =
            mark_task_success(&mut g, t1, 9.0, &[PathBuf::from("/p/b")], &AlwaysExists).unwrap();
        assert!(outcome.is_resolved());
        assert_eq!(g.task_attrs(t1).unwrap().run_time_sec, run_time);
    }

    #[test]
    fn test_task_input_files_ordered_by_index() {
        let reg: TaskRegistry = vec![
            MetaTask::new("pipewright.tasks.two_in", vec![txt(), txt()], vec![txt()]),
        ]
        .into_iter()
        .collect();
        let mut g = build_binding_graph(
            &reg,
            &[
                (
                    "$entry:e1".to_string(),
                    "pipewright.tasks.two_in:0".to_string(),
                ),
                (
                    "$entry:e2".to_string(),
                    "pipewright.tasks.two_in:1".to_string(),
                ),
            ],
        )
        .unwrap();
        resolve_entry_point(&mut g, "e1", Path::new("/p/first")).unwrap();
        resolve_entry_point(&mut g, "e2", Path::new("/p/second")).unwrap();

        let t = task_node(&g, "pipewright.tasks.two_in");
        let inputs = task_input_files(&g, t);
        assert_eq!(
            inputs,
            vec![
                Some(PathBuf::from("/p/first")),
                Some(PathBuf::from("/p/second")),
            ]
        );
    }

    #[test]
    fn test_tasks_by_state_and_running_queries() {
        let mut g = linear_graph();
        let t1 = task_node(&g, "pipewright.tasks.t1");

        assert!(!has_running_task(&g));
        assert!(!are_all_tasks_running(&g));

        update_task_state(&mut g, t1, TaskState::Running).unwrap();
        assert!(has_running_task(&g));
        assert_eq!(tasks_by_state(&g, &[TaskState::Running]), vec![t1]);
    }

    #[test]
    fn test_completion_requires_resolved_files_and_terminal_tasks() {
        let mut g = linear_graph();
        resolve_entry_point(&mut g, "e1", Path::new("/p/in")).unwrap();
        let t1 = task_node(&g, "pipewright.tasks.t1");
        let t2 = task_node(&g, "pipewright.tasks.t2");

        // terminal tasks alone are not enough: output files stay unresolved
        update_task_state(&mut g, t1, TaskState::Killed).unwrap();
        update_task_state(&mut g, t2, TaskState::Killed).unwrap();
        assert!(!is_workflow_complete(&g));
        assert!(!was_workflow_successful(&g));
    }
}
