use crate::error::IngestError;
use crate::models::{Boundary, BoundaryKind, LineKind, NormalizedLine, Outline, UNLABELED};
use regex::{Captures, Regex};
use tracing::debug;

const MAX_LABEL_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Exercise,
    Example,
    Section,
    /// Numbered sub-question. Never opens a unit of its own.
    ListItem,
}

impl SignatureKind {
    pub fn boundary_kind(self) -> Option<BoundaryKind> {
        match self {
            SignatureKind::Exercise => Some(BoundaryKind::Exercise),
            SignatureKind::Example => Some(BoundaryKind::Example),
            SignatureKind::Section => Some(BoundaryKind::Section),
            SignatureKind::ListItem => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LabelStyle {
    /// Capture expansion, e.g. `EXERCISE $number`.
    Template(String),
    /// The line itself, capped at 80 characters.
    Line,
    None,
}

#[derive(Debug, Clone)]
pub struct SignatureRule {
    pub name: &'static str,
    pub priority: u8,
    pub kind: SignatureKind,
    pub pattern: Regex,
    pub headings_only: bool,
    pub label: LabelStyle,
}

impl SignatureRule {
    pub fn new(
        name: &'static str,
        priority: u8,
        kind: SignatureKind,
        pattern: &str,
        label: LabelStyle,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            name,
            priority,
            kind,
            pattern: Regex::new(pattern)?,
            headings_only: false,
            label,
        })
    }

    pub fn headings_only(mut self) -> Self {
        self.headings_only = true;
        self
    }

    fn render_label(&self, captures: &Captures<'_>, line: &str) -> String {
        match &self.label {
            LabelStyle::Template(template) => {
                let mut label = String::new();
                captures.expand(template, &mut label);
                label
            }
            LabelStyle::Line => line.chars().take(MAX_LABEL_CHARS).collect::<String>(),
            LabelStyle::None => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub rule: &'static str,
    pub kind: SignatureKind,
    pub label: String,
}

/// Matches normalized lines against an ordered signature table. Rules are
/// tried in priority order and the first match claims the line.
#[derive(Debug, Clone)]
pub struct BoundaryDetector {
    rules: Vec<SignatureRule>,
}

impl BoundaryDetector {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self::with_rules(default_rules()?))
    }

    pub fn with_rules(mut rules: Vec<SignatureRule>) -> Self {
        rules.sort_by_key(|rule| rule.priority);
        Self { rules }
    }

    pub fn rules(&self) -> &[SignatureRule] {
        &self.rules
    }

    pub fn classify(&self, line: &NormalizedLine) -> Option<Signature> {
        if line.is_separator() {
            return None;
        }

        self.rules.iter().find_map(|rule| {
            if rule.headings_only && line.kind != LineKind::HeadingCandidate {
                return None;
            }
            rule.pattern.captures(&line.text).map(|captures| Signature {
                rule: rule.name,
                kind: rule.kind,
                label: rule.render_label(&captures, &line.text),
            })
        })
    }

    pub fn detect(&self, lines: &[NormalizedLine]) -> Vec<Boundary> {
        self.outline(lines).boundaries
    }

    pub fn outline(&self, lines: &[NormalizedLine]) -> Outline {
        let mut outline = Outline::default();

        for (offset, line) in lines.iter().enumerate() {
            let Some(signature) = self.classify(line) else {
                continue;
            };
            match signature.kind.boundary_kind() {
                Some(kind) => outline.boundaries.push(Boundary {
                    offset,
                    kind,
                    label: signature.label,
                }),
                None => {
                    outline.list_items.insert(offset);
                }
            }
        }

        if outline.boundaries.is_empty() {
            outline.boundaries.push(Boundary {
                offset: 0,
                kind: BoundaryKind::Unknown,
                label: UNLABELED.to_string(),
            });
        }

        debug!(
            boundaries = outline.boundaries.len(),
            list_items = outline.list_items.len(),
            "detected structural boundaries"
        );
        outline
    }
}

/// Exercise headers outrank example headers, which outrank section headings;
/// list items come last.
pub fn default_rules() -> Result<Vec<SignatureRule>, IngestError> {
    Ok(vec![
        SignatureRule::new(
            "exercise",
            10,
            SignatureKind::Exercise,
            r"(?i)^exercise\s+(?P<number>\d+(?:\.\d+)*)\b",
            LabelStyle::Template("EXERCISE $number".to_string()),
        )?,
        SignatureRule::new(
            "miscellaneous-exercise",
            11,
            SignatureKind::Exercise,
            r"(?i)^miscellaneous\s+exercises?\s+on\s+chapter\s+(?P<number>\d+)\b",
            LabelStyle::Template("Miscellaneous Exercise on Chapter $number".to_string()),
        )?,
        SignatureRule::new(
            "example",
            20,
            SignatureKind::Example,
            r"(?i)^example\s+(?P<number>\d+)\b",
            LabelStyle::Template("Example $number".to_string()),
        )?,
        SignatureRule::new(
            "chapter",
            30,
            SignatureKind::Section,
            r"(?i)^chapter\s+(?P<number>\d+)\b",
            LabelStyle::Template("CHAPTER $number".to_string()),
        )?,
        SignatureRule::new(
            "numbered-section",
            31,
            SignatureKind::Section,
            r"^\d+(?:\.\d+)+\s+[A-Z]",
            LabelStyle::Line,
        )?
        .headings_only(),
        SignatureRule::new(
            "summary",
            32,
            SignatureKind::Section,
            r"(?i)^summary$",
            LabelStyle::Template("Summary".to_string()),
        )?,
        SignatureRule::new(
            "list-item",
            40,
            SignatureKind::ListItem,
            r"^(?:\d{1,2}[.)]|\((?:[ivx]{1,4}|[a-z]|\d{1,2})\))(?:\s+\S|$)",
            LabelStyle::None,
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, kind: LineKind) -> NormalizedLine {
        NormalizedLine {
            text: text.to_string(),
            page: 1,
            kind,
        }
    }

    fn body(text: &str) -> NormalizedLine {
        line(text, LineKind::Body)
    }

    fn heading(text: &str) -> NormalizedLine {
        line(text, LineKind::HeadingCandidate)
    }

    fn detector() -> BoundaryDetector {
        BoundaryDetector::new().expect("default rules compile")
    }

    #[test]
    fn detects_exercises_examples_and_sections_in_order() {
        let lines = vec![
            heading("3.3 TRIGONOMETRIC FUNCTIONS"),
            body("we define the six functions."),
            heading("Example 13"),
            body("Find the value of sin 31π/3."),
            heading("exercise 3.1"),
            body("1. Find the radian measures."),
        ];

        let boundaries = detector().detect(&lines);
        let summary = boundaries
            .iter()
            .map(|boundary| (boundary.offset, boundary.kind, boundary.label.as_str()))
            .collect::<Vec<_>>();

        assert_eq!(
            summary,
            vec![
                (0, BoundaryKind::Section, "3.3 TRIGONOMETRIC FUNCTIONS"),
                (2, BoundaryKind::Example, "Example 13"),
                (4, BoundaryKind::Exercise, "EXERCISE 3.1"),
            ]
        );
    }

    #[test]
    fn adjacent_boundaries_of_the_same_kind_stay_distinct() {
        let lines = vec![body("Example 1 Convert 40° to radians."), body("Example 2 Convert 6 radians.")];
        let boundaries = detector().detect(&lines);
        assert_eq!(boundaries.len(), 2);
        assert_eq!(boundaries[0].label, "Example 1");
        assert_eq!(boundaries[1].label, "Example 2");
    }

    #[test]
    fn numbered_sections_require_heading_lines() {
        let lines = vec![body("2.5 Times the radius gives the arc length")];
        let boundaries = detector().detect(&lines);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].kind, BoundaryKind::Unknown);
    }

    #[test]
    fn list_items_are_soft_breaks_not_boundaries() {
        let lines = vec![
            heading("EXERCISE 3.1"),
            body("1. Find the radian measures corresponding to 25°."),
            body("(ii) – 47°30′"),
            body("2. Find the degree measures."),
        ];

        let outline = detector().outline(&lines);
        assert_eq!(outline.boundaries.len(), 1);
        assert_eq!(outline.list_items.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn no_boundaries_yields_one_implicit_unknown_unit() {
        let lines = vec![body("plain prose"), NormalizedLine::separator(1), body("more prose")];
        let boundaries = detector().detect(&lines);
        assert_eq!(
            boundaries,
            vec![Boundary {
                offset: 0,
                kind: BoundaryKind::Unknown,
                label: UNLABELED.to_string(),
            }]
        );
    }

    #[test]
    fn higher_priority_rule_wins_on_the_same_line() -> Result<(), IngestError> {
        let rules = vec![
            SignatureRule::new(
                "section-anywhere",
                30,
                SignatureKind::Section,
                r"Section",
                LabelStyle::Line,
            )?,
            SignatureRule::new(
                "example-anywhere",
                20,
                SignatureKind::Example,
                r"Example (?P<number>\d+)",
                LabelStyle::Template("Example $number".to_string()),
            )?,
        ];
        let detector = BoundaryDetector::with_rules(rules);
        let signature = detector.classify(&body("Section 2 Example 7"));
        assert_eq!(
            signature.map(|signature| (signature.kind, signature.label)),
            Some((SignatureKind::Example, "Example 7".to_string()))
        );
        Ok(())
    }

    #[test]
    fn detection_is_deterministic() {
        let lines = vec![
            heading("CHAPTER 3"),
            heading("3.1 Introduction"),
            body("Example 4 Find the angle."),
            heading("Summary"),
        ];
        let detector = detector();
        let first = detector.detect(&lines);
        let second = detector.detect(&lines);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].label, "CHAPTER 3");
    }
}
