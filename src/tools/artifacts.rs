//! Artifact sink: append-only, name-addressed persistent object store.

use crate::errors::ToolError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Reference to one stored artifact version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub version: u32,
    pub digest: String,
}

/// Append-only artifact store consumed through the tool gateway.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn store(&self, name: &str, content: &str) -> Result<ArtifactRef, ToolError>;
}

fn digest_of(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Filesystem-backed store. Each artifact name owns a directory holding
/// numbered versions plus a `latest.json` alias; numbered versions are
/// never overwritten.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn next_version(&self, dir: &std::path::Path) -> std::io::Result<u32> {
        if !dir.exists() {
            return Ok(1);
        }
        let count = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .strip_prefix('v')
                    .is_some_and(|rest| rest.ends_with(".json"))
            })
            .count();
        Ok(count as u32 + 1)
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactStore {
    async fn store(&self, name: &str, content: &str) -> Result<ArtifactRef, ToolError> {
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ToolError::backend("store_artifact", e.to_string()))?;

        let version = self
            .next_version(&dir)
            .map_err(|e| ToolError::backend("store_artifact", e.to_string()))?;

        let versioned = dir.join(format!("v{}.json", version));
        std::fs::write(&versioned, content)
            .map_err(|e| ToolError::backend("store_artifact", e.to_string()))?;
        std::fs::write(dir.join("latest.json"), content)
            .map_err(|e| ToolError::backend("store_artifact", e.to_string()))?;

        Ok(ArtifactRef {
            name: name.to_string(),
            version,
            digest: digest_of(content),
        })
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: DashMap<String, Vec<(String, String)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version_count(&self, name: &str) -> usize {
        self.entries.get(name).map(|v| v.len()).unwrap_or(0)
    }

    pub fn latest(&self, name: &str) -> Option<String> {
        self.entries
            .get(name)
            .and_then(|v| v.last().map(|(_, content)| content.clone()))
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactStore {
    async fn store(&self, name: &str, content: &str) -> Result<ArtifactRef, ToolError> {
        let mut entry = self.entries.entry(name.to_string()).or_default();
        entry.push((digest_of(content), content.to_string()));
        Ok(ArtifactRef {
            name: name.to_string(),
            version: entry.len() as u32,
            digest: digest_of(content),
        })
    }
}
