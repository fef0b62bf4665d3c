//! Content-addressed cache of track analyses.
//!
//! Entries are keyed by the SHA-256 of the raw clip bytes, so the same upload
//! is never analyzed twice regardless of its file name.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::track::TrackAnalysis;

const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CacheEntry {
    schema_version: u32,
    content_hash: String,
    analysis: TrackAnalysis,
}

#[derive(Debug, Clone)]
pub struct AnalysisCache {
    dir: PathBuf,
}

impl AnalysisCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create analysis cache dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn key(bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        format!("{digest:x}")
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.analysis.json"))
    }

    /// Cached analysis for `key`; unreadable or outdated entries count as misses.
    #[instrument(skip(self))]
    pub fn get(&self, key: &str) -> Option<TrackAnalysis> {
        let path = self.entry_path(key);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.schema_version == CACHE_SCHEMA_VERSION && entry.content_hash == key => {
                debug!(path = %path.display(), "analysis cache hit");
                Some(entry.analysis)
            }
            Ok(_) => {
                warn!(path = %path.display(), "analysis cache entry outdated, ignoring");
                None
            }
            Err(error) => {
                warn!(path = %path.display(), ?error, "analysis cache parse failed, ignoring");
                None
            }
        }
    }

    /// Stores `analysis` atomically under `key`.
    #[instrument(skip(self, analysis))]
    pub fn put(&self, key: &str, analysis: &TrackAnalysis) -> Result<PathBuf> {
        let entry = CacheEntry {
            schema_version: CACHE_SCHEMA_VERSION,
            content_hash: key.to_string(),
            analysis: analysis.clone(),
        };
        let json = serde_json::to_vec_pretty(&entry).context("failed to encode analysis json")?;

        let path = self.entry_path(key);
        let mut temp_file = tempfile::NamedTempFile::new_in(&self.dir)
            .context("failed to create temp analysis file")?;
        temp_file
            .write_all(&json)
            .context("failed to write temp analysis file")?;
        temp_file
            .persist(&path)
            .map_err(|error| anyhow::anyhow!(error.error))
            .with_context(|| format!("failed to persist analysis: {}", path.display()))?;

        debug!(path = %path.display(), "analysis cached");
        Ok(path)
    }
}
