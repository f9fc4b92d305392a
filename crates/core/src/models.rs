use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type ChunkId = String;

/// Label given to text that precedes every detected boundary.
pub const UNLABELED: &str = "unlabeled";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub number: u32,
    pub text: String,
    /// Text came from the OCR fallback rather than the PDF text layer.
    #[serde(default)]
    pub ocr: bool,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            ocr: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub checksum: Option<String>,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(document_id: impl Into<String>, pages: Vec<Page>) -> Self {
        let document_id = document_id.into();
        Self {
            title: document_id.clone(),
            source_path: String::new(),
            checksum: None,
            document_id,
            pages,
        }
    }

    pub fn is_ocr_page(&self, page: u32) -> bool {
        self.pages
            .iter()
            .any(|candidate| candidate.number == page && candidate.ocr)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LineKind {
    Body,
    HeadingCandidate,
    /// Paragraph separator. Carries no text.
    Noise,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedLine {
    pub text: String,
    pub page: u32,
    pub kind: LineKind,
}

impl NormalizedLine {
    pub fn separator(page: u32) -> Self {
        Self {
            text: String::new(),
            page,
            kind: LineKind::Noise,
        }
    }

    pub fn is_separator(&self) -> bool {
        self.kind == LineKind::Noise
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    Section,
    Example,
    Exercise,
    Unknown,
}

impl BoundaryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BoundaryKind::Section => "section",
            BoundaryKind::Example => "example",
            BoundaryKind::Exercise => "exercise",
            BoundaryKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoundaryKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "section" => Ok(BoundaryKind::Section),
            "example" => Ok(BoundaryKind::Example),
            "exercise" => Ok(BoundaryKind::Exercise),
            "unknown" => Ok(BoundaryKind::Unknown),
            other => Err(format!(
                "unknown boundary kind `{other}` (expected section, example, exercise or unknown)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Boundary {
    pub offset: usize,
    pub kind: BoundaryKind,
    pub label: String,
}

/// Hard boundaries plus the line offsets of numbered list items, which only
/// act as paragraph starts when an oversize unit has to be split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    pub boundaries: Vec<Boundary>,
    pub list_items: BTreeSet<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub ordinal: u64,
    pub pages: Vec<u32>,
    pub text: String,
    pub label: String,
    pub label_kind: BoundaryKind,
    pub char_len: usize,
    pub truncated: bool,
    #[serde(default)]
    pub ocr: bool,
}

impl Chunk {
    pub fn first_page(&self) -> Option<u32> {
        self.pages.first().copied()
    }

    pub fn last_page(&self) -> Option<u32> {
        self.pages.last().copied()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Lexical,
    Vector,
    Fused,
}

impl RetrievalSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalSource::Lexical => "lexical",
            RetrievalSource::Vector => "vector",
            RetrievalSource::Fused => "fused",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedHit {
    pub chunk_id: ChunkId,
    pub score: f64,
    pub source: RetrievalSource,
}

/// 1-based rank of a chunk in each source list it appeared in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRanks {
    pub lexical: Option<usize>,
    pub vector: Option<usize>,
}

/// Fused scores are ordinal ranking aids. They are not comparable across
/// different rank constants or candidate counts and must not be thresholded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionResult {
    pub chunk_id: ChunkId,
    pub score: f64,
    pub ranks: SourceRanks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub fusion: FusionResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub query: String,
    pub generation: Uuid,
    pub hits: Vec<RetrievedChunk>,
    /// One source was unavailable; hits are ranked by the remaining source.
    pub degraded: bool,
}

impl RetrievalResponse {
    pub fn empty(query: impl Into<String>, generation: Uuid, degraded: bool) -> Self {
        Self {
            query: query.into(),
            generation,
            hits: Vec::new(),
            degraded,
        }
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.hits
            .iter()
            .map(|hit| hit.chunk.chunk_id.as_str())
            .collect()
    }

    pub fn context_passages(&self) -> Vec<ContextPassage> {
        self.hits
            .iter()
            .map(|hit| ContextPassage {
                text: hit.chunk.text.clone(),
                label: hit.chunk.label.clone(),
                score: hit.fusion.score,
            })
            .collect()
    }
}

/// What the answer-generation step receives for each retrieved chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextPassage {
    pub text: String,
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

impl PageRange {
    pub fn new(first: u32, last: u32) -> Self {
        Self {
            first: first.min(last),
            last: first.max(last),
        }
    }

    pub fn contains(&self, page: u32) -> bool {
        (self.first..=self.last).contains(&page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct QueryFilters {
    pub document_id: Option<String>,
    pub label_kind: Option<BoundaryKind>,
    pub label: Option<String>,
    pub pages: Option<PageRange>,
}

impl QueryFilters {
    pub fn for_document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.document_id.is_none()
            && self.label_kind.is_none()
            && self.label.is_none()
            && self.pages.is_none()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(document_id) = &self.document_id {
            if &chunk.document_id != document_id {
                return false;
            }
        }
        if let Some(kind) = self.label_kind {
            if chunk.label_kind != kind {
                return false;
            }
        }
        if let Some(label) = &self.label {
            if !chunk.label.eq_ignore_ascii_case(label) {
                return false;
            }
        }
        if let Some(range) = self.pages {
            if !chunk.pages.iter().any(|page| range.contains(*page)) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub chunk_count: usize,
    pub labels: Vec<String>,
    pub indexed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document_id: &str, kind: BoundaryKind, pages: Vec<u32>) -> Chunk {
        Chunk {
            chunk_id: "c".to_string(),
            document_id: document_id.to_string(),
            ordinal: 0,
            pages,
            text: "text".to_string(),
            label: "Example 4".to_string(),
            label_kind: kind,
            char_len: 4,
            truncated: false,
            ocr: false,
        }
    }

    #[test]
    fn empty_filters_match_everything() {
        let filters = QueryFilters::default();
        assert!(filters.is_empty());
        assert!(filters.matches(&chunk("doc-1", BoundaryKind::Example, vec![1])));
    }

    #[test]
    fn page_filter_matches_any_overlapping_page() {
        let filters = QueryFilters {
            pages: Some(PageRange::new(5, 3)),
            ..QueryFilters::default()
        };
        assert!(filters.matches(&chunk("doc-1", BoundaryKind::Example, vec![2, 3])));
        assert!(!filters.matches(&chunk("doc-1", BoundaryKind::Example, vec![6, 7])));
    }

    #[test]
    fn all_filter_fields_must_hold() {
        let filters = QueryFilters {
            document_id: Some("doc-1".to_string()),
            label_kind: Some(BoundaryKind::Exercise),
            ..QueryFilters::default()
        };
        assert!(!filters.matches(&chunk("doc-1", BoundaryKind::Example, vec![1])));
        assert!(!filters.matches(&chunk("doc-2", BoundaryKind::Exercise, vec![1])));
        assert!(filters.matches(&chunk("doc-1", BoundaryKind::Exercise, vec![1])));
    }

    #[test]
    fn boundary_kind_parses_case_insensitively() {
        assert_eq!("Exercise".parse::<BoundaryKind>(), Ok(BoundaryKind::Exercise));
        assert!("chapter".parse::<BoundaryKind>().is_err());
    }
}
