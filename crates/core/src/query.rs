use crate::error::SearchError;
use crate::models::{BoundaryKind, QueryFilters, RetrievalResponse};
use crate::retriever::HybridRetriever;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info};

/// Largest number of labels one example range expands to.
const MAX_RANGE_LABELS: u32 = 11;

/// Hits fetched per label when a question spans an example range.
const HITS_PER_RANGE_LABEL: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryIntent {
    Definition,
    Theorem,
    Formula,
    Example,
    Exercise,
    Concept,
}

const INTENT_KEYWORDS: [(QueryIntent, &[&str]); 6] = [
    (QueryIntent::Definition, &["what is", "define", "meaning of", "definition"]),
    (QueryIntent::Theorem, &["theorem", "prove", "proof"]),
    (QueryIntent::Formula, &["formula", "equation", "expression"]),
    (QueryIntent::Example, &["example", "demonstrate", "illustrate"]),
    (QueryIntent::Exercise, &["solve", "exercise", "problem", "question"]),
    (QueryIntent::Concept, &["explain", "how", "why", "concept"]),
];

/// A structural unit named in the question, e.g. "Example 13".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub kind: BoundaryKind,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryAnalysis {
    pub intent: QueryIntent,
    pub entity: Option<EntityRef>,
    /// Canonical labels for "examples 2 to 5" style questions.
    pub example_range: Vec<String>,
}

pub struct QueryClassifier {
    exercise: Regex,
    example: Regex,
    example_range: Regex,
}

impl QueryClassifier {
    pub fn new() -> Result<Self, SearchError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|error| SearchError::InvalidConfig(error.to_string()))
        };
        Ok(Self {
            exercise: compile(r"(?i)\bexercise\s+(\d+(?:\.\d+)*)\b")?,
            example: compile(r"(?i)\b(?:example|ex\.)\s*(\d+)\b")?,
            example_range: compile(r"(?i)\bexamples?\s+(\d+)\s*(?:to|-|–)\s*(\d+)\b")?,
        })
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let entity = self.entity(query);
        let intent = match &entity {
            Some(EntityRef {
                kind: BoundaryKind::Exercise,
                ..
            }) => QueryIntent::Exercise,
            Some(_) => QueryIntent::Example,
            None => keyword_intent(query),
        };

        QueryAnalysis {
            intent,
            entity,
            example_range: self.example_range(query),
        }
    }

    pub fn entity(&self, query: &str) -> Option<EntityRef> {
        if let Some(captures) = self.exercise.captures(query) {
            return Some(EntityRef {
                kind: BoundaryKind::Exercise,
                label: format!("EXERCISE {}", &captures[1]),
            });
        }
        self.example.captures(query).map(|captures| EntityRef {
            kind: BoundaryKind::Example,
            label: format!("Example {}", &captures[1]),
        })
    }

    /// Reversed bounds are swapped; long ranges are cut to 11 labels.
    pub fn example_range(&self, query: &str) -> Vec<String> {
        let Some(captures) = self.example_range.captures(query) else {
            return Vec::new();
        };
        let (Ok(start), Ok(end)) = (captures[1].parse::<u32>(), captures[2].parse::<u32>()) else {
            return Vec::new();
        };
        let (start, end) = (start.min(end), start.max(end));
        let end = end.min(start.saturating_add(MAX_RANGE_LABELS - 1));
        (start..=end).map(|number| format!("Example {number}")).collect()
    }
}

fn keyword_intent(query: &str) -> QueryIntent {
    let padded = format!(
        " {} ",
        query
            .to_lowercase()
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    );
    INTENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| padded.contains(&format!(" {keyword} ")))
        })
        .map_or(QueryIntent::Concept, |(intent, _)| *intent)
}

/// Entity-aware search on top of [`HybridRetriever`].
pub struct RetrievalPipeline {
    retriever: HybridRetriever,
    classifier: QueryClassifier,
}

impl RetrievalPipeline {
    pub fn new(retriever: HybridRetriever) -> Result<Self, SearchError> {
        Ok(Self {
            retriever,
            classifier: QueryClassifier::new()?,
        })
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn classifier(&self) -> &QueryClassifier {
        &self.classifier
    }

    /// Example ranges fetch a couple of hits per label; a single named unit
    /// is searched by label first and falls back to plain retrieval when
    /// nothing carries that label.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: &QueryFilters,
    ) -> Result<RetrievalResponse, SearchError> {
        let analysis = self.classifier.analyze(query);
        debug!(intent = ?analysis.intent, entity = ?analysis.entity, "classified query");

        if !analysis.example_range.is_empty() && k > 0 {
            if let Some(response) = self.search_range(query, k, filters, &analysis.example_range).await? {
                return Ok(response);
            }
        }

        if let Some(entity) = &analysis.entity {
            let labelled = QueryFilters {
                label_kind: Some(entity.kind),
                label: Some(entity.label.clone()),
                ..filters.clone()
            };
            let response = self.retriever.retrieve(query, k, &labelled).await?;
            if !response.hits.is_empty() {
                return Ok(response);
            }
            info!(label = %entity.label, "no chunk carries the requested label, falling back to plain retrieval");
        }

        self.retriever.retrieve(query, k, filters).await
    }

    async fn search_range(
        &self,
        query: &str,
        k: usize,
        filters: &QueryFilters,
        labels: &[String],
    ) -> Result<Option<RetrievalResponse>, SearchError> {
        let mut combined: Option<RetrievalResponse> = None;
        let mut seen = HashSet::new();

        for label in labels {
            let labelled = QueryFilters {
                label_kind: Some(BoundaryKind::Example),
                label: Some(label.clone()),
                ..filters.clone()
            };
            let response = self
                .retriever
                .retrieve(query, HITS_PER_RANGE_LABEL, &labelled)
                .await?;

            let target = combined.get_or_insert_with(|| {
                RetrievalResponse::empty(query, response.generation, false)
            });
            target.degraded |= response.degraded;
            for hit in response.hits {
                if seen.insert(hit.chunk.chunk_id.clone()) {
                    target.hits.push(hit);
                }
            }
        }

        Ok(combined
            .filter(|response| !response.hits.is_empty())
            .map(|mut response| {
                response.hits.truncate(k);
                response
            }))
    }
}
