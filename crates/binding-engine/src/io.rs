//! Injected filesystem and chunk-manifest interfaces
//!
//! The engine never touches the filesystem directly: output existence
//! checks and chunk-manifest persistence go through these traits so hosts
//! can substitute their own storage. Standard implementations are provided.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunk::PipelineChunk;
use crate::error::Result;

/// Boolean existence probe for task output validation
pub trait FileSystemProbe {
    /// Whether a path exists on disk
    fn exists(&self, path: &Path) -> bool;
}

/// Probe backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystemProbe;

impl FileSystemProbe for StdFileSystemProbe {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Reader/writer pair for chunk manifests
///
/// The encoding is opaque to the graph logic; only the chunk list matters.
pub trait ChunkIo {
    /// Load the chunks of a manifest file
    fn load_chunks(&self, path: &Path) -> Result<Vec<PipelineChunk>>;

    /// Persist chunks to a manifest file
    fn write_chunks(&self, chunks: &[PipelineChunk], path: &Path, comment: &str) -> Result<()>;
}

/// On-disk manifest shape for the JSON implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    chunks: Vec<PipelineChunk>,
}

/// Chunk manifests as pretty-printed JSON files
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonChunkIo;

impl ChunkIo for JsonChunkIo {
    fn load_chunks(&self, path: &Path) -> Result<Vec<PipelineChunk>> {
        let raw = fs::read_to_string(path)?;
        let manifest: ChunkManifest = serde_json::from_str(&raw)?;
        log::debug!(
            "Loaded {} pipeline chunks from {}",
            manifest.chunks.len(),
            path.display()
        );
        Ok(manifest.chunks)
    }

    fn write_chunks(&self, chunks: &[PipelineChunk], path: &Path, comment: &str) -> Result<()> {
        let manifest = ChunkManifest {
            comment: Some(comment.to_string()),
            chunks: chunks.to_vec(),
        };
        let raw = serde_json::to_string_pretty(&manifest)?;
        fs::write(path, raw)?;
        log::debug!(
            "Wrote {} pipeline chunks to {}",
            chunks.len(),
            path.display()
        );
        Ok(())
    }
}
