use crate::config::NormalizerConfig;
use crate::error::IngestError;
use crate::models::{LineKind, NormalizedLine, Page};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const STRUCTURAL_KEYWORDS: [&str; 8] = [
    "example",
    "exercise",
    "chapter",
    "section",
    "theorem",
    "definition",
    "summary",
    "miscellaneous",
];

/// Lines inspected at the top and bottom of each page for running headers.
const EDGE_LINES: usize = 2;

/// Turns raw page text into a flat stream of tagged lines.
///
/// Normalization never fails: text that matches no rule comes through as
/// [`LineKind::Body`].
pub struct TextNormalizer {
    config: NormalizerConfig,
    page_number: Regex,
    roman_numeral: Regex,
    section_number: Regex,
    noise: Vec<Regex>,
}

impl TextNormalizer {
    pub fn new(config: NormalizerConfig) -> Result<Self, IngestError> {
        let noise = config
            .noise_patterns
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            page_number: Regex::new(
                r"^(?:[Pp]age\s*|PAGE\s*)?[-–—]?\s*(\d{1,4}|[ivxlc]{2,7})\s*[-–—]?$",
            )?,
            roman_numeral: Regex::new(r"^c{0,3}(?:xc|xl|l?x{0,3})(?:ix|iv|v?i{0,3})$")?,
            section_number: Regex::new(r"^\d+(?:\.\d+)+\s")?,
            noise,
            config,
        })
    }

    pub fn normalize(&self, pages: &[Page]) -> Vec<NormalizedLine> {
        let cleaned: Vec<(u32, Vec<String>)> = pages
            .iter()
            .map(|page| (page.number, clean_page(&page.text)))
            .collect();

        let running_headers = self.running_headers(&cleaned);
        let mut lines: Vec<NormalizedLine> = Vec::new();
        let mut dropped = 0usize;

        for (page, page_lines) in &cleaned {
            let mut pending_break = false;
            let edges = self.edge_flags(page_lines);
            for (line, at_edge) in page_lines.iter().zip(edges) {
                if line.is_empty() {
                    pending_break = true;
                    continue;
                }
                let furniture = self.noise.iter().any(|noise| noise.is_match(line))
                    || (at_edge
                        && (self.is_page_marker(line)
                            || header_key(line).is_some_and(|key| running_headers.contains(&key))));
                if furniture {
                    dropped += 1;
                    continue;
                }
                if pending_break && lines.last().is_some_and(|last| !last.is_separator()) {
                    lines.push(NormalizedLine::separator(*page));
                }
                pending_break = false;
                lines.push(NormalizedLine {
                    text: line.clone(),
                    page: *page,
                    kind: LineKind::Body,
                });
            }
        }

        rejoin_hyphenated(&mut lines);

        for line in &mut lines {
            if !line.is_separator() && self.is_heading_candidate(&line.text) {
                line.kind = LineKind::HeadingCandidate;
            }
        }

        debug!(
            pages = pages.len(),
            lines = lines.len(),
            dropped,
            running_headers = running_headers.len(),
            "normalized document text"
        );
        lines
    }

    /// Arabic page numbers, or lowercase roman numerals of two or more
    /// letters in valid form. A lone `x` or `c` is a variable, not a page.
    fn is_page_marker(&self, line: &str) -> bool {
        let Some(captures) = self.page_number.captures(line) else {
            return false;
        };
        let numeral = &captures[1];
        numeral.starts_with(|ch: char| ch.is_ascii_digit()) || self.roman_numeral.is_match(numeral)
    }

    /// Marks the lines within `EDGE_LINES` content lines of the top or bottom
    /// of a page. Blank lines and page markers are not counted as content.
    fn edge_flags(&self, lines: &[String]) -> Vec<bool> {
        let counted = lines
            .iter()
            .map(|line| !line.is_empty() && !self.is_page_marker(line))
            .collect::<Vec<_>>();
        let total = counted.iter().filter(|counted| **counted).count();

        let mut before = 0usize;
        counted
            .iter()
            .map(|&is_content| {
                let after = total - before - usize::from(is_content);
                let edge = before < EDGE_LINES || after < EDGE_LINES;
                if is_content {
                    before += 1;
                }
                edge
            })
            .collect()
    }

    /// Keys of lines that repeat at the top or bottom of enough distinct pages.
    fn running_headers(&self, pages: &[(u32, Vec<String>)]) -> HashSet<String> {
        let min_pages = self.config.running_header_min_pages;
        if min_pages == 0 || pages.len() < min_pages {
            return HashSet::new();
        }

        let mut seen_on: HashMap<String, HashSet<usize>> = HashMap::new();
        for (index, (_, lines)) in pages.iter().enumerate() {
            let edge = lines
                .iter()
                .zip(self.edge_flags(lines))
                .filter(|(line, at_edge)| *at_edge && !line.is_empty() && !self.is_page_marker(line))
                .map(|(line, _)| line);

            for line in edge {
                if line.chars().count() > self.config.heading_max_chars {
                    continue;
                }
                if let Some(key) = header_key(line) {
                    seen_on.entry(key).or_default().insert(index);
                }
            }
        }

        seen_on
            .into_iter()
            .filter(|(_, on_pages)| on_pages.len() >= min_pages)
            .map(|(key, _)| key)
            .collect()
    }

    fn is_heading_candidate(&self, text: &str) -> bool {
        if text.chars().count() > self.config.heading_max_chars {
            return false;
        }
        if text.ends_with(['.', ',', ';', ':']) {
            return false;
        }
        self.section_number.is_match(text) || starts_with_keyword(text) || mostly_uppercase(text)
    }
}

fn clean_page(text: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(text.len());
    for ch in text.replace("\r\n", "\n").chars() {
        match ch {
            '\r' | '\u{000c}' => cleaned.push('\n'),
            '\u{00a0}' | '\t' => cleaned.push(' '),
            '\u{00ad}' => {}
            '\u{fb00}' => cleaned.push_str("ff"),
            '\u{fb01}' => cleaned.push_str("fi"),
            '\u{fb02}' => cleaned.push_str("fl"),
            '\u{fb03}' => cleaned.push_str("ffi"),
            '\u{fb04}' => cleaned.push_str("ffl"),
            ch if ch.is_control() && ch != '\n' => cleaned.push(' '),
            ch => cleaned.push(ch),
        }
    }

    cleaned
        .split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

/// Running-header identity: lowercase text without standalone page numbers.
/// Structural headings never qualify, so repeated "Example"/"EXERCISE" lines
/// at page tops survive.
fn header_key(line: &str) -> Option<String> {
    if starts_with_keyword(line) {
        return None;
    }
    let key = line
        .split_whitespace()
        .filter(|token| !token.chars().all(|ch| ch.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if key.chars().any(char::is_alphabetic) {
        Some(key)
    } else {
        None
    }
}

fn starts_with_keyword(text: &str) -> bool {
    let first = text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_end_matches(|ch: char| !ch.is_alphanumeric())
        .to_lowercase();
    STRUCTURAL_KEYWORDS.contains(&first.as_str())
}

fn mostly_uppercase(text: &str) -> bool {
    let letters = text.chars().filter(|ch| ch.is_alphabetic()).count();
    let upper = text.chars().filter(|ch| ch.is_uppercase()).count();
    letters >= 3 && upper * 10 >= letters * 6
}

/// Moves the continuation of a word broken as `trigono-` / `metric` back onto
/// the first line. Only applies when both fragments are lowercase and no
/// paragraph separator sits between them.
fn rejoin_hyphenated(lines: &mut Vec<NormalizedLine>) {
    let mut index = 0;
    while index + 1 < lines.len() {
        let breaks_word = {
            let current = &lines[index];
            let next = &lines[index + 1];
            !current.is_separator()
                && !next.is_separator()
                && ends_with_broken_word(&current.text)
                && next.text.chars().next().is_some_and(char::is_lowercase)
        };

        if breaks_word {
            let next_text = std::mem::take(&mut lines[index + 1].text);
            let (fragment, rest) = match next_text.split_once(' ') {
                Some((fragment, rest)) => (fragment.to_string(), rest.to_string()),
                None => (next_text, String::new()),
            };
            let current = &mut lines[index].text;
            current.pop();
            current.push_str(&fragment);

            if rest.is_empty() {
                lines.remove(index + 1);
            } else {
                lines[index + 1].text = rest;
            }
        }
        index += 1;
    }
}

fn ends_with_broken_word(text: &str) -> bool {
    let mut tail = text.chars().rev();
    tail.next() == Some('-') && tail.next().is_some_and(char::is_lowercase)
}
