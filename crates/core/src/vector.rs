use crate::config::Similarity;
use crate::error::SearchError;
use crate::models::{ChunkId, RankedHit, RetrievalSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub chunk_id: ChunkId,
    pub embedding: Vec<f32>,
}

/// Exact nearest-neighbour index. Every query scans all stored vectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    similarity: Similarity,
    vectors: BTreeMap<ChunkId, Vec<f32>>,
}

impl VectorIndex {
    pub fn new(dimension: usize, similarity: Similarity) -> Self {
        Self {
            dimension,
            similarity,
            vectors: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn similarity(&self) -> Similarity {
        self.similarity
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.vectors.contains_key(chunk_id)
    }

    pub fn get(&self, chunk_id: &str) -> Option<&[f32]> {
        self.vectors.get(chunk_id).map(Vec::as_slice)
    }

    pub fn records(&self) -> impl Iterator<Item = VectorRecord> + '_ {
        self.vectors.iter().map(|(chunk_id, embedding)| VectorRecord {
            chunk_id: chunk_id.clone(),
            embedding: embedding.clone(),
        })
    }

    /// Stores or replaces the embedding for `chunk_id`. Cosine indexes keep
    /// unit-length copies.
    pub fn build(&mut self, chunk_id: impl Into<ChunkId>, embedding: Vec<f32>) -> Result<(), SearchError> {
        let chunk_id = chunk_id.into();
        self.validate(&chunk_id, &embedding)?;
        let embedding = match self.similarity {
            Similarity::Cosine => unit_length(embedding),
            Similarity::InnerProduct => embedding,
        };
        self.vectors.insert(chunk_id, embedding);
        Ok(())
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = VectorRecord>) -> Result<(), SearchError> {
        for record in records {
            self.build(record.chunk_id, record.embedding)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, chunk_ids: &[ChunkId]) -> usize {
        chunk_ids
            .iter()
            .filter(|chunk_id| self.vectors.remove(chunk_id.as_str()).is_some())
            .count()
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RankedHit>, SearchError> {
        self.search_filtered(query, k, |_| true)
    }

    /// Exact top-k by similarity over chunks accepted by `allow`. Ties go to
    /// the smaller chunk id.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, allow: F) -> Result<Vec<RankedHit>, SearchError>
    where
        F: Fn(&str) -> bool,
    {
        self.validate("query", query)?;
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let query = match self.similarity {
            Similarity::Cosine => unit_length(query.to_vec()),
            Similarity::InnerProduct => query.to_vec(),
        };

        let mut ranked = self
            .vectors
            .iter()
            .filter(|(chunk_id, _)| allow(chunk_id))
            .map(|(chunk_id, embedding)| (chunk_id, dot(&query, embedding)))
            .collect::<Vec<_>>();
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.cmp(right.0)));
        ranked.truncate(k);

        Ok(ranked
            .into_iter()
            .map(|(chunk_id, score)| RankedHit {
                chunk_id: chunk_id.clone(),
                score,
                source: RetrievalSource::Vector,
            })
            .collect())
    }

    fn validate(&self, context: &str, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
                context: context.to_string(),
            });
        }
        if let Some(position) = vector.iter().position(|value| !value.is_finite()) {
            return Err(SearchError::InvalidVector {
                context: context.to_string(),
                reason: format!("non-finite component at {position}"),
            });
        }
        Ok(())
    }
}

fn dot(left: &[f32], right: &[f32]) -> f64 {
    left.iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum()
}

/// Zero vectors are returned unchanged and score 0 against everything.
pub(crate) fn unit_length(mut vector: Vec<f32>) -> Vec<f32> {
    let magnitude = vector
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
        .sqrt();
    if magnitude > 0.0 {
        for value in &mut vector {
            *value = (f64::from(*value) / magnitude) as f32;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(hits: &[RankedHit]) -> Vec<&str> {
        hits.iter().map(|hit| hit.chunk_id.as_str()).collect()
    }

    fn index(similarity: Similarity) -> Result<VectorIndex, SearchError> {
        let mut index = VectorIndex::new(3, similarity);
        index.build("east", vec![1.0, 0.0, 0.0])?;
        index.build("north", vec![0.0, 1.0, 0.0])?;
        index.build("long-east", vec![10.0, 1.0, 0.0])?;
        Ok(index)
    }

    #[test]
    fn cosine_ranks_by_angle_not_magnitude() -> Result<(), SearchError> {
        let hits = index(Similarity::Cosine)?.search(&[2.0, 0.0, 0.0], 3)?;
        assert_eq!(ids(&hits), vec!["east", "long-east", "north"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].source, RetrievalSource::Vector);
        Ok(())
    }

    #[test]
    fn inner_product_rewards_magnitude() -> Result<(), SearchError> {
        let hits = index(Similarity::InnerProduct)?.search(&[1.0, 0.0, 0.0], 1)?;
        assert_eq!(ids(&hits), vec!["long-east"]);
        Ok(())
    }

    #[test]
    fn dimension_mismatch_names_the_offender() {
        let mut index = VectorIndex::new(3, Similarity::Cosine);
        let inserted = index.build("short", vec![1.0, 2.0]);
        assert!(matches!(
            inserted,
            Err(SearchError::DimensionMismatch { expected: 3, actual: 2, ref context }) if context == "short"
        ));

        let queried = index.search(&[1.0], 5);
        assert!(matches!(
            queried,
            Err(SearchError::DimensionMismatch { ref context, .. }) if context == "query"
        ));
    }

    #[test]
    fn non_finite_components_are_rejected() {
        let mut index = VectorIndex::new(2, Similarity::Cosine);
        assert!(matches!(
            index.build("nan", vec![f32::NAN, 1.0]),
            Err(SearchError::InvalidVector { .. })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn empty_index_returns_no_hits() -> Result<(), SearchError> {
        let index = VectorIndex::new(3, Similarity::Cosine);
        assert!(index.search(&[1.0, 0.0, 0.0], 4)?.is_empty());
        Ok(())
    }

    #[test]
    fn ties_break_by_ascending_chunk_id_and_filters_apply() -> Result<(), SearchError> {
        let mut index = VectorIndex::new(2, Similarity::Cosine);
        index.build("b", vec![1.0, 1.0])?;
        index.build("a", vec![2.0, 2.0])?;
        index.build("c", vec![3.0, 3.0])?;

        assert_eq!(ids(&index.search(&[1.0, 1.0], 2)?), vec!["a", "b"]);
        let filtered = index.search_filtered(&[1.0, 1.0], 5, |chunk_id| chunk_id != "a")?;
        assert_eq!(ids(&filtered), vec!["b", "c"]);
        Ok(())
    }

    #[test]
    fn rebuilding_replaces_and_remove_drops() -> Result<(), SearchError> {
        let mut index = index(Similarity::Cosine)?;
        index.build("north", vec![1.0, 0.0, 0.0])?;
        assert_eq!(index.len(), 3);
        assert_eq!(index.remove(&["north".to_string(), "missing".to_string()]), 1);
        assert!(!index.contains("north"));
        Ok(())
    }
}
