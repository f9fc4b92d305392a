use crate::models::{Chunk, ChunkId, Document, DocumentSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub checksum: Option<String>,
    pub chunk_ids: Vec<ChunkId>,
    pub indexed_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn from_document(document: &Document) -> Self {
        Self {
            document_id: document.document_id.clone(),
            title: document.title.clone(),
            source_path: document.source_path.clone(),
            checksum: document.checksum.clone(),
            chunk_ids: Vec::new(),
            indexed_at: Utc::now(),
        }
    }
}

/// Owns chunk text and per-document metadata. Indexes only hold chunk ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkStore {
    chunks: BTreeMap<ChunkId, Chunk>,
    documents: BTreeMap<String, DocumentRecord>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn document(&self, document_id: &str) -> Option<&DocumentRecord> {
        self.documents.get(document_id)
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.documents.values()
    }

    /// Chunks of one document in emission order.
    pub fn chunks_for_document(&self, document_id: &str) -> Vec<&Chunk> {
        self.documents
            .get(document_id)
            .map(|record| {
                record
                    .chunk_ids
                    .iter()
                    .filter_map(|chunk_id| self.chunks.get(chunk_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replaces every chunk of the record's document and returns the ids
    /// that were dropped.
    pub fn replace_document(&mut self, mut record: DocumentRecord, chunks: Vec<Chunk>) -> Vec<ChunkId> {
        let removed = self.remove_document(&record.document_id);
        record.chunk_ids = chunks.iter().map(|chunk| chunk.chunk_id.clone()).collect();
        for chunk in chunks {
            self.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        self.documents.insert(record.document_id.clone(), record);
        removed
    }

    pub fn remove_document(&mut self, document_id: &str) -> Vec<ChunkId> {
        let Some(record) = self.documents.remove(document_id) else {
            return Vec::new();
        };
        for chunk_id in &record.chunk_ids {
            self.chunks.remove(chunk_id);
        }
        record.chunk_ids
    }

    pub fn list_documents(&self) -> Vec<DocumentSummary> {
        self.documents
            .values()
            .map(|record| {
                let labels = record
                    .chunk_ids
                    .iter()
                    .filter_map(|chunk_id| self.chunks.get(chunk_id))
                    .map(|chunk| chunk.label.clone())
                    .collect::<BTreeSet<_>>();
                DocumentSummary {
                    document_id: record.document_id.clone(),
                    title: record.title.clone(),
                    source_path: record.source_path.clone(),
                    chunk_count: record.chunk_ids.len(),
                    labels: labels.into_iter().collect(),
                    indexed_at: record.indexed_at,
                }
            })
            .collect()
    }
}
