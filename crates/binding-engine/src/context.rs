//! Per-run shared state
//!
//! The original global file-type counter and run-scoped paths are carried
//! explicitly in a `RunContext`, owned and written by the single scheduler
//! for the lifetime of one workflow run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// File name of the merged chunk manifest written by the gather graft
pub const GATHERED_CHUNKS_FILE: &str = "gathered-pipeline.chunks.json";

/// Run-scoped state threaded through path allocation and chunking
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique id of this workflow run
    pub run_id: Uuid,
    /// Root directory of the run; the merged chunk manifest lands here
    pub run_dir: PathBuf,
    /// How many output files of each file type have been allocated so far
    file_type_counts: HashMap<String, u32>,
}

impl RunContext {
    /// Create a context for a new run
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            run_dir: run_dir.into(),
            file_type_counts: HashMap::new(),
        }
    }

    /// Allocate the next instance number for a file type
    ///
    /// Returns the count before this call; the counter is incremented
    /// afterwards. Shared across all allocations of a run so generated
    /// names stay globally unique.
    pub fn next_file_instance(&mut self, file_type_id: &str) -> u32 {
        let counter = self.file_type_counts.entry(file_type_id.to_string()).or_insert(0);
        let instance = *counter;
        *counter += 1;
        instance
    }

    /// Current counter value for a file type without allocating
    pub fn file_instance_count(&self, file_type_id: &str) -> u32 {
        self.file_type_counts.get(file_type_id).copied().unwrap_or(0)
    }

    /// Reset the allocation counters (per-run state only)
    pub fn reset_file_counts(&mut self) {
        self.file_type_counts.clear();
    }

    /// Path of the merged chunk manifest for this run
    pub fn gathered_chunks_path(&self) -> PathBuf {
        self.run_dir.join(GATHERED_CHUNKS_FILE)
    }

    /// The run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}
