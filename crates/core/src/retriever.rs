use crate::config::RetrievalConfig;
use crate::error::{EmbeddingError, SearchError};
use crate::index::{CorpusIndex, IndexHandle};
use crate::models::{FusionResult, QueryFilters, RankedHit, RetrievalResponse, RetrievedChunk, SourceRanks};
use crate::traits::Embedder;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Characters of a chunk used as the query when looking for related chunks.
const RELATED_QUERY_CHARS: usize = 500;

pub struct HybridRetriever {
    handle: Arc<IndexHandle>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(handle: Arc<IndexHandle>, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self {
            handle,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn handle(&self) -> &Arc<IndexHandle> {
        &self.handle
    }

    /// Lexical and vector top candidates, filtered before fusion, fused by
    /// reciprocal rank. A failing embedder degrades to lexical-only.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filters: &QueryFilters,
    ) -> Result<RetrievalResponse, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if k == 0 {
            return Ok(RetrievalResponse::empty(query, self.handle.snapshot().generation(), false));
        }

        let query_vector = self.embed_query(query).await?;
        let index = self.handle.snapshot();
        self.retrieve_in(&index, query, query_vector.as_deref(), k, filters, None)
    }

    /// Chunks similar to `chunk_id`, using the start of its text as the
    /// query. The chunk itself is never returned.
    pub async fn related(&self, chunk_id: &str, k: usize) -> Result<RetrievalResponse, SearchError> {
        let query = {
            let index = self.handle.snapshot();
            let chunk = index
                .chunk(chunk_id)
                .ok_or_else(|| SearchError::UnknownChunk(chunk_id.to_string()))?;
            chunk.text.chars().take(RELATED_QUERY_CHARS).collect::<String>()
        };
        if query.trim().is_empty() || k == 0 {
            return Ok(RetrievalResponse::empty(query, self.handle.snapshot().generation(), false));
        }

        let query_vector = self.embed_query(&query).await?;
        let index = self.handle.snapshot();
        self.retrieve_in(
            &index,
            &query,
            query_vector.as_deref(),
            k,
            &QueryFilters::default(),
            Some(chunk_id),
        )
    }

    /// A wrong-sized query vector is fatal; any other embedder failure
    /// degrades the query to lexical-only.
    async fn embed_query(&self, query: &str) -> Result<Option<Vec<f32>>, SearchError> {
        match self.embedder.embed(query).await {
            Ok(vector) => Ok(Some(vector)),
            Err(EmbeddingError::DimensionMismatch { expected, actual }) => {
                Err(SearchError::DimensionMismatch {
                    expected,
                    actual,
                    context: "query".to_string(),
                })
            }
            Err(error) => {
                warn!(%error, "query embedding failed, falling back to lexical-only retrieval");
                Ok(None)
            }
        }
    }

    fn retrieve_in(
        &self,
        index: &CorpusIndex,
        query: &str,
        query_vector: Option<&[f32]>,
        k: usize,
        filters: &QueryFilters,
        exclude: Option<&str>,
    ) -> Result<RetrievalResponse, SearchError> {
        let candidates = self.config.candidates_for(k);
        let allow = |chunk_id: &str| {
            exclude != Some(chunk_id)
                && index
                    .chunk(chunk_id)
                    .is_some_and(|chunk| filters.matches(chunk))
        };

        let lexical = index.lexical().search_filtered(query, candidates, &allow);
        let (vector, degraded) = match query_vector {
            Some(query_vector) => (
                index.vector().search_filtered(query_vector, candidates, &allow)?,
                false,
            ),
            None => (Vec::new(), true),
        };

        let fused = reciprocal_rank_fusion(&lexical, &vector, self.config.rank_constant);
        let hits = fused
            .into_iter()
            .filter_map(|fusion| {
                index.chunk(&fusion.chunk_id).map(|chunk| RetrievedChunk {
                    chunk: chunk.clone(),
                    fusion,
                })
            })
            .take(k)
            .collect::<Vec<_>>();

        debug!(
            generation = %index.generation(),
            lexical = lexical.len(),
            vector = vector.len(),
            returned = hits.len(),
            degraded,
            "hybrid retrieval finished"
        );

        Ok(RetrievalResponse {
            query: query.to_string(),
            generation: index.generation(),
            hits,
            degraded,
        })
    }
}

/// Reciprocal rank fusion: each list adds `1 / (rank_constant + rank)` with
/// 1-based ranks. Source scores are never combined. Ties go to the smaller
/// chunk id.
pub fn reciprocal_rank_fusion(
    lexical: &[RankedHit],
    vector: &[RankedHit],
    rank_constant: f64,
) -> Vec<FusionResult> {
    let mut fused = HashMap::<&str, FusionResult>::new();

    for (position, hit) in lexical.iter().enumerate() {
        let rank = position + 1;
        let entry = fused.entry(hit.chunk_id.as_str()).or_insert_with(|| blank(&hit.chunk_id));
        if entry.ranks.lexical.is_none() {
            entry.ranks.lexical = Some(rank);
            entry.score += 1.0 / (rank_constant + rank as f64);
        }
    }
    for (position, hit) in vector.iter().enumerate() {
        let rank = position + 1;
        let entry = fused.entry(hit.chunk_id.as_str()).or_insert_with(|| blank(&hit.chunk_id));
        if entry.ranks.vector.is_none() {
            entry.ranks.vector = Some(rank);
            entry.score += 1.0 / (rank_constant + rank as f64);
        }
    }

    let mut results = fused.into_values().collect::<Vec<_>>();
    results.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.chunk_id.cmp(&right.chunk_id))
    });
    results
}

fn blank(chunk_id: &str) -> FusionResult {
    FusionResult {
        chunk_id: chunk_id.to_string(),
        score: 0.0,
        ranks: SourceRanks::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::models::{BoundaryKind, Chunk, Document, Page, PageRange, RetrievalSource};
    use crate::store::DocumentRecord;
    use async_trait::async_trait;

    const DIMENSIONS: usize = 64;

    struct OfflineEmbedder;

    #[async_trait]
    impl Embedder for OfflineEmbedder {
        fn dimensions(&self) -> usize {
            DIMENSIONS
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("model offline".to_string()))
        }
    }

    /// Backend that answers with vectors of the wrong size.
    struct ResizedEmbedder;

    #[async_trait]
    impl Embedder for ResizedEmbedder {
        fn dimensions(&self) -> usize {
            DIMENSIONS
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::DimensionMismatch {
                expected: DIMENSIONS,
                actual: 5,
            })
        }
    }

    fn hit(chunk_id: &str, source: RetrievalSource) -> RankedHit {
        RankedHit {
            chunk_id: chunk_id.to_string(),
            score: 0.0,
            source,
        }
    }

    fn lexical(ids: &[&str]) -> Vec<RankedHit> {
        ids.iter().map(|id| hit(id, RetrievalSource::Lexical)).collect()
    }

    fn vector(ids: &[&str]) -> Vec<RankedHit> {
        ids.iter().map(|id| hit(id, RetrievalSource::Vector)).collect()
    }

    fn chunk(document_id: &str, chunk_id: &str, kind: BoundaryKind, page: u32, text: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            ordinal: 0,
            pages: vec![page],
            text: text.to_string(),
            label: format!("{kind} {chunk_id}"),
            label_kind: kind,
            char_len: text.chars().count(),
            truncated: false,
            ocr: false,
        }
    }

    fn corpus() -> Result<Arc<IndexHandle>, SearchError> {
        let embedder = HashingEmbedder::new(DIMENSIONS);
        let handle = Arc::new(IndexHandle::new(CorpusIndex::empty(&RetrievalConfig::default(), DIMENSIONS)));
        let documents = [
            (
                "doc-1",
                vec![
                    chunk("doc-1", "a1", BoundaryKind::Section, 1, "Angles are measured in degrees or radians."),
                    chunk("doc-1", "a2", BoundaryKind::Example, 2, "Convert 40 degrees into radian measure."),
                    chunk("doc-1", "a3", BoundaryKind::Exercise, 3, "Find the radian measures corresponding to 25 degrees."),
                ],
            ),
            (
                "doc-2",
                vec![
                    chunk("doc-2", "b1", BoundaryKind::Section, 1, "Sets, relations and functions."),
                    chunk("doc-2", "b2", BoundaryKind::Example, 9, "Radian measure of the angle subtended at the centre."),
                ],
            ),
        ];
        for (document_id, chunks) in documents {
            let embeddings = chunks
                .iter()
                .map(|chunk| Some(embedder.embed_text(&chunk.text)))
                .collect();
            let record = DocumentRecord::from_document(&Document::new(document_id, vec![Page::new(1, "")]));
            handle.replace_document(record, chunks, embeddings)?;
        }
        Ok(handle)
    }

    fn retriever(handle: Arc<IndexHandle>) -> HybridRetriever {
        HybridRetriever::new(handle, Arc::new(HashingEmbedder::new(DIMENSIONS)), RetrievalConfig::default())
    }

    #[test]
    fn fused_score_sums_reciprocal_ranks() {
        let fused = reciprocal_rank_fusion(&lexical(&["a", "b"]), &vector(&["b", "c"]), 60.0);

        let b = fused.iter().find(|result| result.chunk_id == "b");
        let b = b.map(|result| (result.score, result.ranks));
        assert_eq!(
            b,
            Some((
                1.0 / 62.0 + 1.0 / 61.0,
                SourceRanks {
                    lexical: Some(2),
                    vector: Some(1)
                }
            ))
        );
        assert_eq!(fused[0].chunk_id, "b");
    }

    #[test]
    fn absent_sources_contribute_nothing() {
        let fused = reciprocal_rank_fusion(&lexical(&["a"]), &[], 60.0);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].score, 1.0 / 61.0);
        assert_eq!(fused[0].ranks.vector, None);
    }

    #[test]
    fn fusion_is_monotone_in_either_rank() {
        let baseline = reciprocal_rank_fusion(&lexical(&["x", "y", "z"]), &vector(&["y", "z", "x"]), 60.0);
        let promoted = reciprocal_rank_fusion(&lexical(&["z", "x", "y"]), &vector(&["y", "z", "x"]), 60.0);

        let score = |results: &[FusionResult], id: &str| {
            results
                .iter()
                .find(|result| result.chunk_id == id)
                .map(|result| result.score)
                .unwrap_or_default()
        };
        assert!(score(&promoted, "z") > score(&baseline, "z"));
    }

    #[test]
    fn equal_fused_scores_break_by_chunk_id() {
        let fused = reciprocal_rank_fusion(&lexical(&["b"]), &vector(&["a"]), 60.0);
        assert_eq!(
            fused.iter().map(|result| result.chunk_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn blank_query_is_rejected_and_zero_k_is_empty() -> Result<(), SearchError> {
        let retriever = retriever(corpus()?);
        assert!(matches!(
            retriever.retrieve("   ", 5, &QueryFilters::default()).await,
            Err(SearchError::EmptyQuery)
        ));
        let response = retriever.retrieve("radian", 0, &QueryFilters::default()).await?;
        assert!(response.hits.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn hybrid_retrieval_ranks_by_fused_score() -> Result<(), SearchError> {
        let retriever = retriever(corpus()?);
        let response = retriever.retrieve("radian measure", 3, &QueryFilters::default()).await?;

        assert!(!response.degraded);
        assert_eq!(response.hits.len(), 3);
        assert!(response
            .hits
            .windows(2)
            .all(|pair| pair[0].fusion.score >= pair[1].fusion.score));
        assert!(response
            .hits
            .iter()
            .all(|hit| hit.fusion.ranks.lexical.is_some() || hit.fusion.ranks.vector.is_some()));
        Ok(())
    }

    #[tokio::test]
    async fn embedder_failure_degrades_to_lexical_only() -> Result<(), SearchError> {
        let retriever = HybridRetriever::new(corpus()?, Arc::new(OfflineEmbedder), RetrievalConfig::default());
        let response = retriever.retrieve("radian", 5, &QueryFilters::default()).await?;

        assert!(response.degraded);
        assert!(!response.hits.is_empty());
        assert!(response.hits.iter().all(|hit| hit.fusion.ranks.vector.is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn every_hit_satisfies_the_filters() -> Result<(), SearchError> {
        let retriever = retriever(corpus()?);
        let filters = QueryFilters {
            document_id: Some("doc-1".to_string()),
            label_kind: Some(BoundaryKind::Exercise),
            pages: Some(PageRange::new(1, 3)),
            ..QueryFilters::default()
        };
        let response = retriever.retrieve("radian measure", 5, &filters).await?;

        assert_eq!(response.chunk_ids(), vec!["a3"]);
        assert!(response.hits.iter().all(|hit| filters.matches(&hit.chunk)));

        let nothing = QueryFilters {
            pages: Some(PageRange::new(40, 50)),
            ..QueryFilters::default()
        };
        assert!(retriever.retrieve("radian", 5, &nothing).await?.hits.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn related_chunks_exclude_the_source_chunk() -> Result<(), SearchError> {
        let retriever = retriever(corpus()?);
        let response = retriever.related("a2", 3).await?;

        assert!(!response.hits.is_empty());
        assert!(response.chunk_ids().iter().all(|chunk_id| *chunk_id != "a2"));
        assert!(matches!(
            retriever.related("missing", 3).await,
            Err(SearchError::UnknownChunk(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn embedder_dimension_mismatch_is_surfaced() -> Result<(), SearchError> {
        let retriever = HybridRetriever::new(
            corpus()?,
            Arc::new(HashingEmbedder::new(DIMENSIONS + 1)),
            RetrievalConfig::default(),
        );
        assert!(matches!(
            retriever.retrieve("radian", 5, &QueryFilters::default()).await,
            Err(SearchError::DimensionMismatch { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn backend_dimension_mismatch_is_fatal_not_degraded() -> Result<(), SearchError> {
        let retriever = HybridRetriever::new(corpus()?, Arc::new(ResizedEmbedder), RetrievalConfig::default());

        let retrieved = retriever.retrieve("radian", 3, &QueryFilters::default()).await;
        assert!(matches!(
            retrieved,
            Err(SearchError::DimensionMismatch { expected: DIMENSIONS, actual: 5, ref context }) if context == "query"
        ));
        assert!(matches!(
            retriever.related("a1", 3).await,
            Err(SearchError::DimensionMismatch { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_answers_with_no_hits() -> Result<(), SearchError> {
        let handle = Arc::new(IndexHandle::new(CorpusIndex::empty(&RetrievalConfig::default(), DIMENSIONS)));
        let response = retriever(handle).retrieve("radian", 5, &QueryFilters::default()).await?;
        assert!(response.hits.is_empty());
        assert!(!response.degraded);
        Ok(())
    }
}
