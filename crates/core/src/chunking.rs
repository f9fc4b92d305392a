use crate::config::ChunkingConfig;
use crate::error::IngestError;
use crate::models::{BoundaryKind, Chunk, NormalizedLine, Outline, UNLABELED};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::ops::Range;
use tracing::debug;

const PARAGRAPH_BREAK: &str = "\n\n";
const LINE_BREAK: &str = "\n";
const SENTENCE_BREAK: &str = " ";

/// Splits normalized lines into chunks that follow structural units.
pub struct StructureAwareChunker {
    config: ChunkingConfig,
}

struct Segment<'a> {
    lines: Range<usize>,
    label: &'a str,
    kind: BoundaryKind,
}

#[derive(Debug, Clone)]
struct Piece {
    /// Separator to the previous piece of the same segment.
    lead: &'static str,
    text: String,
    chars: usize,
    pages: BTreeSet<u32>,
}

impl Piece {
    fn new(lead: &'static str, text: String, pages: BTreeSet<u32>) -> Self {
        Self {
            lead,
            chars: text.chars().count(),
            text,
            pages,
        }
    }

    fn joined_len(&self, next: &Piece) -> usize {
        self.chars + next.lead.len() + next.chars
    }

    fn append(&mut self, next: Piece) {
        self.text.push_str(next.lead);
        self.text.push_str(&next.text);
        self.chars += next.lead.len() + next.chars;
        self.pages.extend(next.pages);
    }
}

impl StructureAwareChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn chunk(&self, document_id: &str, lines: &[NormalizedLine], outline: &Outline) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut oversize_units = 0usize;

        for segment in segments(lines, outline) {
            let Some(range) = trim_separators(lines, segment.lines.clone()) else {
                continue;
            };
            let paragraphs = paragraphs(lines, range, outline);
            let total = paragraphs
                .iter()
                .enumerate()
                .map(|(index, piece)| piece.chars + if index == 0 { 0 } else { piece.lead.len() })
                .sum::<usize>();

            let (pieces, truncated) = if total <= self.config.max_chars {
                (merge_all(paragraphs), false)
            } else {
                oversize_units += 1;
                (self.pack(paragraphs), true)
            };

            for piece in pieces {
                let ordinal = chunks.len() as u64;
                chunks.push(Chunk {
                    chunk_id: make_chunk_id(document_id, ordinal, &piece.text),
                    document_id: document_id.to_string(),
                    ordinal,
                    pages: piece.pages.into_iter().collect(),
                    char_len: piece.chars,
                    text: piece.text,
                    label: segment.label.to_string(),
                    label_kind: segment.kind,
                    truncated,
                    ocr: false,
                });
            }
        }

        debug!(
            document_id,
            chunks = chunks.len(),
            oversize_units,
            "chunked document"
        );
        chunks
    }

    /// Greedy packing of an oversize unit. Paragraphs stay whole unless a
    /// single paragraph is itself above the limit.
    fn pack(&self, paragraphs: Vec<Piece>) -> Vec<Piece> {
        let max_chars = self.config.max_chars;
        let mut packed: Vec<Piece> = Vec::new();
        let mut current: Option<Piece> = None;

        let pieces = paragraphs.into_iter().flat_map(|paragraph| {
            if paragraph.chars <= max_chars {
                return vec![paragraph];
            }
            split_sentences(&paragraph.text, max_chars)
                .into_iter()
                .enumerate()
                .map(|(index, text)| {
                    let lead = if index == 0 { paragraph.lead } else { SENTENCE_BREAK };
                    Piece::new(lead, text, paragraph.pages.clone())
                })
                .collect()
        });

        for piece in pieces {
            current = match current.take() {
                None => Some(piece),
                Some(mut open) if open.joined_len(&piece) <= max_chars => {
                    open.append(piece);
                    Some(open)
                }
                Some(open) => {
                    packed.push(open);
                    Some(piece)
                }
            };
        }

        if let Some(last) = current {
            if last.chars < self.config.min_chars && !packed.is_empty() {
                let previous = packed.len() - 1;
                packed[previous].append(last);
            } else {
                packed.push(last);
            }
        }
        packed
    }
}

fn segments<'a>(lines: &[NormalizedLine], outline: &'a Outline) -> Vec<Segment<'a>> {
    let mut boundaries = outline.boundaries.iter().collect::<Vec<_>>();
    boundaries.sort_by_key(|boundary| boundary.offset);

    let mut result = Vec::new();
    let first = boundaries
        .first()
        .map_or(lines.len(), |boundary| boundary.offset.min(lines.len()));
    if first > 0 {
        result.push(Segment {
            lines: 0..first,
            label: UNLABELED,
            kind: BoundaryKind::Unknown,
        });
    }

    for (index, boundary) in boundaries.iter().enumerate() {
        let start = boundary.offset.min(lines.len());
        let end = boundaries
            .get(index + 1)
            .map_or(lines.len(), |next| next.offset.min(lines.len()));
        result.push(Segment {
            lines: start..end.max(start),
            label: &boundary.label,
            kind: boundary.kind,
        });
    }
    result
}

fn trim_separators(lines: &[NormalizedLine], range: Range<usize>) -> Option<Range<usize>> {
    let slice = &lines[range.clone()];
    let start = slice.iter().position(|line| !line.is_separator())?;
    let end = slice.iter().rposition(|line| !line.is_separator())?;
    Some(range.start + start..range.start + end + 1)
}

/// Paragraphs of a segment. Separators and numbered list items open a new
/// paragraph.
fn paragraphs(lines: &[NormalizedLine], range: Range<usize>, outline: &Outline) -> Vec<Piece> {
    let mut result = Vec::new();
    let mut current: Option<Piece> = None;
    let mut lead = "";

    for offset in range {
        let line = &lines[offset];
        if line.is_separator() {
            if let Some(done) = current.take() {
                result.push(done);
            }
            lead = PARAGRAPH_BREAK;
            continue;
        }

        if outline.list_items.contains(&offset) {
            if let Some(done) = current.take() {
                result.push(done);
                if lead.is_empty() {
                    lead = LINE_BREAK;
                }
            }
        }

        let line_piece = Piece::new(lead, line.text.clone(), BTreeSet::from([line.page]));
        current = match current.take() {
            None => Some(line_piece),
            Some(mut open) => {
                open.append(Piece { lead: LINE_BREAK, ..line_piece });
                Some(open)
            }
        };
        lead = "";
    }

    if let Some(done) = current {
        result.push(done);
    }
    result
}

fn merge_all(pieces: Vec<Piece>) -> Vec<Piece> {
    let mut iter = pieces.into_iter();
    let Some(mut merged) = iter.next() else {
        return Vec::new();
    };
    for piece in iter {
        merged.append(piece);
    }
    vec![merged]
}

/// Cuts a paragraph into pieces of at most `max_chars`, preferring the
/// sentence end closest to the limit, then the last whitespace.
fn split_sentences(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text.trim();

    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map_or(rest.len(), |(index, _)| index);
        let cut = sentence_cut(rest, limit)
            .or_else(|| whitespace_cut(&rest[..limit]))
            .unwrap_or(limit);

        let (head, tail) = rest.split_at(cut);
        pieces.push(head.trim_end().to_string());
        rest = tail.trim_start();
    }

    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

fn sentence_cut(text: &str, limit: usize) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    let mut best = None;
    while let Some((index, ch)) = chars.next() {
        if index >= limit {
            break;
        }
        let closes_sentence = matches!(ch, '.' | '?' | '!')
            && chars.peek().is_some_and(|(_, next)| next.is_whitespace());
        if closes_sentence {
            best = Some(index + ch.len_utf8());
        }
    }
    best
}

fn whitespace_cut(window: &str) -> Option<usize> {
    window
        .char_indices()
        .filter(|(index, ch)| *index > 0 && ch.is_whitespace())
        .map(|(index, _)| index)
        .last()
}

fn make_chunk_id(document_id: &str, ordinal: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
