use crate::config::RetrievalConfig;
use crate::error::SearchError;
use crate::lexical::LexicalIndex;
use crate::models::{Chunk, DocumentSummary};
use crate::store::{ChunkStore, DocumentRecord};
use crate::vector::VectorIndex;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::info;
use uuid::Uuid;

/// One fully built, immutable index generation.
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    generation: Uuid,
    built_at: DateTime<Utc>,
    store: ChunkStore,
    lexical: LexicalIndex,
    vector: VectorIndex,
}

impl CorpusIndex {
    pub fn empty(retrieval: &RetrievalConfig, dimensions: usize) -> Self {
        Self::from_parts(
            ChunkStore::new(),
            LexicalIndex::new(retrieval.bm25),
            VectorIndex::new(dimensions, retrieval.similarity),
        )
    }

    pub fn from_parts(store: ChunkStore, lexical: LexicalIndex, vector: VectorIndex) -> Self {
        Self {
            generation: Uuid::new_v4(),
            built_at: Utc::now(),
            store,
            lexical,
            vector,
        }
    }

    pub(crate) fn with_generation(mut self, generation: Uuid, built_at: DateTime<Utc>) -> Self {
        self.generation = generation;
        self.built_at = built_at;
        self
    }

    pub fn generation(&self) -> Uuid {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn vector(&self) -> &VectorIndex {
        &self.vector
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.store.get(chunk_id)
    }

    pub fn list_documents(&self) -> Vec<DocumentSummary> {
        self.store.list_documents()
    }

    /// Retrieval settings baked into this generation that differ from
    /// `config`. Restored generations keep the settings they were built with.
    pub fn settings_drift(&self, config: &RetrievalConfig) -> Vec<String> {
        let mut drift = Vec::new();
        if self.lexical.params() != config.bm25 {
            drift.push(format!(
                "bm25 index={:?} config={:?}",
                self.lexical.params(),
                config.bm25
            ));
        }
        if self.vector.similarity() != config.similarity {
            drift.push(format!(
                "similarity index={:?} config={:?}",
                self.vector.similarity(),
                config.similarity
            ));
        }
        drift
    }

    /// Next generation with every chunk of the record's document replaced.
    /// `embeddings[i]` belongs to `chunks[i]`; `None` leaves that chunk
    /// lexical-only.
    pub fn with_document(
        &self,
        record: DocumentRecord,
        chunks: Vec<Chunk>,
        embeddings: Vec<Option<Vec<f32>>>,
    ) -> Result<Self, SearchError> {
        if embeddings.len() != chunks.len() {
            return Err(SearchError::InvalidVector {
                context: record.document_id.clone(),
                reason: format!("{} embeddings for {} chunks", embeddings.len(), chunks.len()),
            });
        }

        let mut next = self.clone();
        let document_id = record.document_id.clone();

        next.lexical.remove_document(&document_id);
        next.lexical.build(&chunks);
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if let Some(embedding) = embedding {
                next.vector.build(chunk.chunk_id.clone(), embedding)?;
            }
        }
        let removed = next.store.replace_document(record, chunks);
        let stale = removed
            .into_iter()
            .filter(|chunk_id| next.store.get(chunk_id).is_none())
            .collect::<Vec<_>>();
        next.vector.remove(&stale);

        Ok(next.renewed())
    }

    /// Next generation without the document, or `None` when it is not indexed.
    pub fn without_document(&self, document_id: &str) -> Option<Self> {
        self.store.document(document_id)?;

        let mut next = self.clone();
        let removed = next.store.remove_document(document_id);
        next.lexical.remove_document(document_id);
        next.vector.remove(&removed);
        Some(next.renewed())
    }

    fn renewed(mut self) -> Self {
        self.generation = Uuid::new_v4();
        self.built_at = Utc::now();
        self
    }
}

/// Swap cell for the published generation. Readers take an `Arc` and search
/// without holding any lock; writers are serialized and publish whole
/// generations.
#[derive(Debug)]
pub struct IndexHandle {
    current: RwLock<Arc<CorpusIndex>>,
    writer: Mutex<()>,
}

impl IndexHandle {
    pub fn new(index: CorpusIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<CorpusIndex> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    pub fn replace_document(
        &self,
        record: DocumentRecord,
        chunks: Vec<Chunk>,
        embeddings: Vec<Option<Vec<f32>>>,
    ) -> Result<Uuid, SearchError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let document_id = record.document_id.clone();
        let chunk_count = chunks.len();
        let next = self.snapshot().with_document(record, chunks, embeddings)?;
        let generation = self.swap(next);
        info!(%generation, document_id = %document_id, chunks = chunk_count, "published index generation");
        Ok(generation)
    }

    /// Returns the new generation id, or `None` when the document was not
    /// indexed.
    pub fn remove_document(&self, document_id: &str) -> Option<Uuid> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let next = self.snapshot().without_document(document_id)?;
        let generation = self.swap(next);
        info!(%generation, document_id = %document_id, "removed document from index");
        Some(generation)
    }

    /// Replaces the whole generation, e.g. after loading a snapshot.
    pub fn publish(&self, index: CorpusIndex) -> Uuid {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let chunks = index.store().len();
        let generation = self.swap(index);
        info!(%generation, chunks, "published index generation");
        generation
    }

    fn swap(&self, next: CorpusIndex) -> Uuid {
        let generation = next.generation();
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(next);
        generation
    }
}
