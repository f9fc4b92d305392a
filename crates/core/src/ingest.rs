use crate::boundary::BoundaryDetector;
use crate::chunking::StructureAwareChunker;
use crate::config::EngineConfig;
use crate::error::{EmbeddingError, IngestError, SearchError};
use crate::index::IndexHandle;
use crate::models::{Chunk, Document};
use crate::normalize::TextNormalizer;
use crate::store::DocumentRecord;
use crate::traits::{Embedder, PdfExtractor};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// First 16 hex characters of the sha256 of the source path.
pub fn document_id_for(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let mut id = format!("{:x}", hasher.finalize());
    id.truncate(16);
    id
}

#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub record: DocumentRecord,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub document_id: String,
    pub source_path: String,
    pub generation: Uuid,
    pub chunks: usize,
    /// Chunks that also made it into the vector index.
    pub embedded: usize,
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub indexed: Vec<IndexedDocument>,
    /// Files whose checksum matches the indexed copy.
    pub unchanged: Vec<PathBuf>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Runs documents through normalize, outline and chunk, embeds the chunks
/// and publishes a new index generation per document.
pub struct DocumentIndexer {
    normalizer: TextNormalizer,
    detector: BoundaryDetector,
    chunker: StructureAwareChunker,
    embedder: Arc<dyn Embedder>,
    handle: Arc<IndexHandle>,
}

impl DocumentIndexer {
    pub fn new(
        config: &EngineConfig,
        embedder: Arc<dyn Embedder>,
        handle: Arc<IndexHandle>,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            normalizer: TextNormalizer::new(config.normalizer.clone())?,
            detector: BoundaryDetector::new()?,
            chunker: StructureAwareChunker::new(config.chunking)?,
            embedder,
            handle,
        })
    }

    pub fn handle(&self) -> &Arc<IndexHandle> {
        &self.handle
    }

    pub fn prepare(&self, document: &Document) -> PreparedDocument {
        let lines = self.normalizer.normalize(&document.pages);
        let outline = self.detector.outline(&lines);
        let mut chunks = self.chunker.chunk(&document.document_id, &lines, &outline);
        for chunk in &mut chunks {
            chunk.ocr = chunk.pages.iter().any(|page| document.is_ocr_page(*page));
        }

        debug!(
            document_id = %document.document_id,
            lines = lines.len(),
            boundaries = outline.boundaries.len(),
            chunks = chunks.len(),
            "prepared document"
        );
        PreparedDocument {
            record: DocumentRecord::from_document(document),
            chunks,
        }
    }

    /// One entry per chunk; a failed embedding leaves that chunk lexical-only.
    /// A vector of the wrong size aborts the document.
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Option<Vec<f32>>>, IngestError> {
        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match self.embedder.embed(&chunk.text).await {
                Ok(embedding) => embeddings.push(Some(embedding)),
                Err(EmbeddingError::DimensionMismatch { expected, actual }) => {
                    return Err(IngestError::Index(SearchError::DimensionMismatch {
                        expected,
                        actual,
                        context: chunk.chunk_id.clone(),
                    }));
                }
                Err(error) => {
                    warn!(chunk_id = %chunk.chunk_id, %error, "chunk embedding failed, indexing lexically only");
                    embeddings.push(None);
                }
            }
        }
        Ok(embeddings)
    }

    pub async fn index_document(&self, document: &Document) -> Result<IndexedDocument, IngestError> {
        let PreparedDocument { record, chunks } = self.prepare(document);
        let embeddings = self.embed_chunks(&chunks).await?;

        let chunk_count = chunks.len();
        let embedded = embeddings.iter().filter(|embedding| embedding.is_some()).count();
        let generation = self.handle.replace_document(record, chunks, embeddings)?;

        info!(
            document_id = %document.document_id,
            title = %document.title,
            chunks = chunk_count,
            embedded,
            "indexed document"
        );
        Ok(IndexedDocument {
            document_id: document.document_id.clone(),
            source_path: document.source_path.clone(),
            generation,
            chunks: chunk_count,
            embedded,
        })
    }

    /// Indexes every PDF under `folder`. Files that fail are reported and
    /// skipped; unchanged files are not re-indexed.
    pub async fn index_folder(
        &self,
        folder: &Path,
        extractor: Arc<dyn PdfExtractor>,
    ) -> Result<IngestionReport, IngestError> {
        let files = discover_pdf_files(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut report = IngestionReport::default();
        for path in files {
            if self.is_unchanged(&path) {
                debug!(path = %path.display(), "checksum unchanged, skipping");
                report.unchanged.push(path);
                continue;
            }

            let outcome = match extract_blocking(Arc::clone(&extractor), path.clone()).await {
                Ok(document) => self.index_document(&document).await,
                Err(error) => Err(error),
            };

            match outcome {
                Ok(indexed) => report.indexed.push(indexed),
                Err(error @ IngestError::Index(SearchError::DimensionMismatch { .. })) => {
                    return Err(error);
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping pdf");
                    report.skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            indexed = report.indexed.len(),
            unchanged = report.unchanged.len(),
            skipped = report.skipped_files.len(),
            "folder ingestion finished"
        );
        Ok(report)
    }

    pub fn remove_document(&self, document_id: &str) -> Option<Uuid> {
        self.handle.remove_document(document_id)
    }

    fn is_unchanged(&self, path: &Path) -> bool {
        let Ok(checksum) = digest_file(path) else {
            return false;
        };
        let index = self.handle.snapshot();
        index
            .store()
            .document(&document_id_for(path))
            .is_some_and(|record| record.checksum.as_deref() == Some(checksum.as_str()))
    }
}

async fn extract_blocking(extractor: Arc<dyn PdfExtractor>, path: PathBuf) -> Result<Document, IngestError> {
    tokio::task::spawn_blocking(move || extractor.extract(&path))
        .await
        .map_err(|error| IngestError::Io(std::io::Error::other(error)))?
}
