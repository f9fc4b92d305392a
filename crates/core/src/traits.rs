use crate::error::{EmbeddingError, IngestError};
use crate::models::Document;
use async_trait::async_trait;
use std::path::Path;

/// Produces a fixed-dimension vector per text. Implementations must return
/// the same vector for the same text.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Reads a PDF into a [`Document`] of numbered raw pages. Blocking; run it
/// on a blocking thread from async code.
pub trait PdfExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Document, IngestError>;
}
