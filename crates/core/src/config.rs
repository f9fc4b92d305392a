use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Extra regexes; a matching line is dropped as page furniture.
    pub noise_patterns: Vec<String>,
    pub running_header_min_pages: usize,
    pub heading_max_chars: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            noise_patterns: vec![r"(?i)^reprint\s+\d{4}(?:\s*-\s*\d{2,4})?$".to_string()],
            running_header_min_pages: 3,
            heading_max_chars: 80,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 2_000,
            min_chars: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidConfig(
                "chunking.max_chars must be positive".to_string(),
            ));
        }
        if self.min_chars >= self.max_chars {
            return Err(IngestError::InvalidConfig(format!(
                "chunking.min_chars ({}) must be below max_chars ({})",
                self.min_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization, 0 disables it.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    Cosine,
    InnerProduct,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub rank_constant: f64,
    pub candidate_multiplier: usize,
    pub bm25: Bm25Params,
    pub similarity: Similarity,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            rank_constant: 60.0,
            candidate_multiplier: 4,
            bm25: Bm25Params::default(),
            similarity: Similarity::Cosine,
        }
    }
}

impl RetrievalConfig {
    pub fn candidates_for(&self, k: usize) -> usize {
        k.saturating_mul(self.candidate_multiplier).max(k.saturating_add(1))
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if !(self.rank_constant.is_finite() && self.rank_constant >= 0.0) {
            return Err(IngestError::InvalidConfig(
                "retrieval.rank_constant must be a non-negative number".to_string(),
            ));
        }
        if self.candidate_multiplier == 0 {
            return Err(IngestError::InvalidConfig(
                "retrieval.candidate_multiplier must be at least 1".to_string(),
            ));
        }
        if self.bm25.k1 < 0.0 || !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(IngestError::InvalidConfig(format!(
                "retrieval.bm25 out of range: k1={} b={}",
                self.bm25.k1, self.bm25.b
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            endpoint: None,
            model: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub normalizer: NormalizerConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
}

impl EngineConfig {
    /// Reads a JSON config file; missing sections fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|error| {
            IngestError::InvalidConfig(format!("{}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking.validate()?;
        self.retrieval.validate()?;
        if self.embedding.dimensions == 0 {
            return Err(IngestError::InvalidConfig(
                "embedding.dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn min_chars_must_stay_below_max_chars() {
        let config = ChunkingConfig {
            max_chars: 100,
            min_chars: 100,
        };
        assert!(matches!(config.validate(), Err(IngestError::InvalidConfig(_))));
    }

    #[test]
    fn candidate_count_over_fetches() {
        let config = RetrievalConfig::default();
        assert_eq!(config.candidates_for(3), 12);
        let single = RetrievalConfig {
            candidate_multiplier: 1,
            ..RetrievalConfig::default()
        };
        assert_eq!(single.candidates_for(3), 4);
        assert_eq!(config.candidates_for(usize::MAX), usize::MAX);
    }

    #[test]
    fn partial_json_file_keeps_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("engine.json");
        fs::write(
            &path,
            r#"{"chunking": {"max_chars": 900}, "retrieval": {"rank_constant": 10.0}}"#,
        )?;

        let config = EngineConfig::from_json_file(&path)?;
        assert_eq!(config.chunking.max_chars, 900);
        assert_eq!(config.chunking.min_chars, 200);
        assert_eq!(config.retrieval.rank_constant, 10.0);
        assert_eq!(config.retrieval.similarity, Similarity::Cosine);
        Ok(())
    }
}
