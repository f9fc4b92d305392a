use crate::config::Bm25Params;
use crate::models::{Chunk, ChunkId, RankedHit, RetrievalSource};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Lowercased alphanumeric runs; everything else separates terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Posting {
    pub chunk_id: ChunkId,
    pub term_frequency: u32,
}

/// In-memory BM25 inverted index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LexicalIndex {
    params: Bm25Params,
    postings: BTreeMap<String, Vec<Posting>>,
    chunk_lengths: BTreeMap<ChunkId, u32>,
    documents: BTreeMap<String, Vec<ChunkId>>,
    total_length: u64,
}

impl LexicalIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn len(&self) -> usize {
        self.chunk_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_lengths.is_empty()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn postings(&self, term: &str) -> &[Posting] {
        self.postings.get(term).map_or(&[], Vec::as_slice)
    }

    pub fn average_length(&self) -> f64 {
        if self.chunk_lengths.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.chunk_lengths.len() as f64
        }
    }

    /// Indexes the chunks, first dropping every posting of the documents they
    /// belong to. Documents absent from `chunks` are untouched.
    pub fn build(&mut self, chunks: &[Chunk]) {
        let documents = chunks
            .iter()
            .map(|chunk| chunk.document_id.as_str())
            .collect::<BTreeSet<_>>();
        for document_id in &documents {
            self.remove_document(document_id);
        }

        for chunk in chunks {
            if self.chunk_lengths.contains_key(&chunk.chunk_id) {
                self.remove_chunks(std::slice::from_ref(&chunk.chunk_id));
            }

            let tokens = tokenize(&chunk.text);
            let mut frequencies = BTreeMap::<String, u32>::new();
            for token in &tokens {
                *frequencies.entry(token.clone()).or_default() += 1;
            }
            for (term, term_frequency) in frequencies {
                self.postings.entry(term).or_default().push(Posting {
                    chunk_id: chunk.chunk_id.clone(),
                    term_frequency,
                });
            }

            let length = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
            self.chunk_lengths.insert(chunk.chunk_id.clone(), length);
            self.total_length += u64::from(length);
            self.documents
                .entry(chunk.document_id.clone())
                .or_default()
                .push(chunk.chunk_id.clone());
        }

        debug!(
            documents = documents.len(),
            chunks = chunks.len(),
            terms = self.postings.len(),
            "lexical index updated"
        );
    }

    pub fn remove_document(&mut self, document_id: &str) -> usize {
        let Some(chunk_ids) = self.documents.remove(document_id) else {
            return 0;
        };
        self.remove_chunks(&chunk_ids)
    }

    fn remove_chunks(&mut self, chunk_ids: &[ChunkId]) -> usize {
        let doomed = chunk_ids.iter().collect::<HashSet<_>>();
        let mut removed = 0;
        for chunk_id in chunk_ids {
            if let Some(length) = self.chunk_lengths.remove(chunk_id) {
                self.total_length = self.total_length.saturating_sub(u64::from(length));
                removed += 1;
            }
        }
        self.postings.retain(|_, postings| {
            postings.retain(|posting| !doomed.contains(&posting.chunk_id));
            !postings.is_empty()
        });
        for ids in self.documents.values_mut() {
            ids.retain(|chunk_id| !doomed.contains(chunk_id));
        }
        removed
    }

    pub fn search(&self, query: &str, k: usize) -> Vec<RankedHit> {
        self.search_filtered(query, k, |_| true)
    }

    /// BM25 top-k over chunks accepted by `allow`. Ties go to the smaller
    /// chunk id.
    pub fn search_filtered<F>(&self, query: &str, k: usize, allow: F) -> Vec<RankedHit>
    where
        F: Fn(&str) -> bool,
    {
        if k == 0 || self.chunk_lengths.is_empty() {
            return Vec::new();
        }

        let terms = tokenize(query).into_iter().collect::<BTreeSet<_>>();
        let corpus_size = self.chunk_lengths.len() as f64;
        let average_length = self.average_length().max(1.0);
        let Bm25Params { k1, b } = self.params;

        let mut scores = HashMap::<&str, f64>::new();
        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let matching = postings.len() as f64;
            let idf = (1.0 + (corpus_size - matching + 0.5) / (matching + 0.5)).ln();

            for posting in postings {
                if !allow(&posting.chunk_id) {
                    continue;
                }
                let length = self
                    .chunk_lengths
                    .get(&posting.chunk_id)
                    .copied()
                    .unwrap_or_default() as f64;
                let tf = f64::from(posting.term_frequency);
                let norm = k1 * (1.0 - b + b * length / average_length);
                *scores.entry(posting.chunk_id.as_str()).or_default() +=
                    idf * tf * (k1 + 1.0) / (tf + norm);
            }
        }

        let mut ranked = scores.into_iter().collect::<Vec<_>>();
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.cmp(right.0)));
        ranked.truncate(k);
        ranked
            .into_iter()
            .map(|(chunk_id, score)| RankedHit {
                chunk_id: chunk_id.to_string(),
                score,
                source: RetrievalSource::Lexical,
            })
            .collect()
    }
}
