pub mod boundary;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod lexical;
pub mod models;
pub mod normalize;
pub mod query;
pub mod retriever;
pub mod snapshot;
pub mod store;
pub mod traits;
pub mod vector;

pub use boundary::{default_rules, BoundaryDetector, LabelStyle, Signature, SignatureKind, SignatureRule};
pub use chunking::StructureAwareChunker;
pub use config::{
    Bm25Params, ChunkingConfig, EmbeddingConfig, EngineConfig, NormalizerConfig, RetrievalConfig,
    Similarity,
};
pub use embeddings::{HashingEmbedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{EmbeddingError, IngestError, SearchError};
pub use extractor::{LopdfExtractor, OcrEndpointConfig};
pub use index::{CorpusIndex, IndexHandle};
pub use ingest::{
    digest_file, discover_pdf_files, document_id_for, DocumentIndexer, IndexedDocument,
    IngestionReport, PreparedDocument, SkippedPdf,
};
pub use lexical::{tokenize, LexicalIndex, Posting};
pub use models::{
    Boundary, BoundaryKind, Chunk, ChunkId, ContextPassage, Document, DocumentSummary,
    FusionResult, LineKind, NormalizedLine, Outline, Page, PageRange, QueryFilters, RankedHit,
    RetrievalResponse, RetrievalSource, RetrievedChunk, SourceRanks, UNLABELED,
};
pub use normalize::TextNormalizer;
pub use query::{EntityRef, QueryAnalysis, QueryClassifier, QueryIntent, RetrievalPipeline};
pub use retriever::{reciprocal_rank_fusion, HybridRetriever};
pub use snapshot::{IndexSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{ChunkStore, DocumentRecord};
pub use traits::{Embedder, PdfExtractor};
pub use vector::{VectorIndex, VectorRecord};
