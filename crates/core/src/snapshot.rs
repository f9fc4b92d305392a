use crate::error::SearchError;
use crate::index::CorpusIndex;
use crate::lexical::LexicalIndex;
use crate::store::ChunkStore;
use crate::vector::VectorIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Serializable copy of one index generation, postings and vectors included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub generation: Uuid,
    pub store: ChunkStore,
    pub lexical: LexicalIndex,
    pub vector: VectorIndex,
}

impl IndexSnapshot {
    pub fn capture(index: &CorpusIndex) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at: Utc::now(),
            generation: index.generation(),
            store: index.store().clone(),
            lexical: index.lexical().clone(),
            vector: index.vector().clone(),
        }
    }

    /// Rebuilds the generation, rejecting unknown formats and vectors that
    /// do not match the expected embedding dimension.
    pub fn restore(self, expected_dimensions: usize) -> Result<CorpusIndex, SearchError> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SearchError::Snapshot(format!(
                "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT_VERSION})",
                self.format_version
            )));
        }
        if self.vector.dimension() != expected_dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: expected_dimensions,
                actual: self.vector.dimension(),
                context: "snapshot".to_string(),
            });
        }
        if let Some(record) = self
            .vector
            .records()
            .find(|record| record.embedding.len() != expected_dimensions)
        {
            return Err(SearchError::DimensionMismatch {
                expected: expected_dimensions,
                actual: record.embedding.len(),
                context: record.chunk_id,
            });
        }
        if let Some(missing) = self
            .vector
            .records()
            .find(|record| self.store.get(&record.chunk_id).is_none())
        {
            return Err(SearchError::UnknownChunk(missing.chunk_id));
        }

        Ok(CorpusIndex::from_parts(self.store, self.lexical, self.vector)
            .with_generation(self.generation, self.created_at))
    }

    /// Writes JSON next to `path` and renames it into place.
    pub fn save(&self, path: &Path) -> Result<(), SearchError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");

        let bytes = serde_json::to_vec(self)?;
        fs::write(&temp, bytes)?;
        fs::rename(&temp, path)?;

        info!(
            path = %path.display(),
            generation = %self.generation,
            chunks = self.store.len(),
            "saved index snapshot"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SearchError> {
        let bytes = fs::read(path)?;
        let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)?;
        debug!(
            path = %path.display(),
            generation = %snapshot.generation,
            format = snapshot.format_version,
            "loaded index snapshot"
        );
        Ok(snapshot)
    }
}
