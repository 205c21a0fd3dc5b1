use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Trailing elapsed-time annotation some transcript UIs glue onto the speaker
/// label, e.g. `"Alice 1 時間 30 分間 45 秒間"` or `"Bob 12 minutes"`.
static SPEAKER_ELAPSED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+\d+\s*(?:時間|分間?|秒間?|hours?|hrs?|minutes?|mins?|seconds?|secs?)(?:\s.*)?$")
        .expect("speaker suffix pattern is valid")
});

/// One collected line. Immutable once built; `text` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    speaker: Option<String>,
    text: String,
    sequence_index: u64,
}

impl LineRecord {
    /// Normalises `text` and `speaker`; returns `None` when nothing is left of the text.
    pub fn new(speaker: Option<&str>, text: &str, sequence_index: u64) -> Option<Self> {
        let text = normalize_text(text);
        if text.is_empty() {
            return None;
        }
        let speaker = speaker
            .map(clean_speaker_label)
            .filter(|label| !label.is_empty());
        Some(Self {
            speaker,
            text,
            sequence_index,
        })
    }

    pub fn speaker(&self) -> Option<&str> {
        self.speaker.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    /// Same content, stamped with its position in the raw output.
    pub fn at_index(self, sequence_index: u64) -> Self {
        Self {
            sequence_index,
            ..self
        }
    }

    /// `speaker<TAB>text`, or `text` alone. Doubles as the dedupe key.
    pub fn raw_line(&self) -> String {
        match &self.speaker {
            Some(speaker) => format!("{speaker}\t{}", self.text),
            None => self.text.clone(),
        }
    }
}

/// Strips surrounding whitespace and folds interior line breaks and tabs into
/// single spaces so every record stays on one raw line.
pub fn normalize_text(value: &str) -> String {
    let trimmed = value.trim();
    if !trimmed.contains(['\n', '\r', '\t']) {
        return trimmed.to_string();
    }
    trimmed
        .split(['\n', '\r', '\t'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn clean_speaker_label(value: &str) -> String {
    let normalized = normalize_text(value);
    SPEAKER_ELAPSED_SUFFIX
        .replace(&normalized, "")
        .trim()
        .to_string()
}

/// In-memory membership set of raw lines already written.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    lines: HashSet<String>,
}

impl SeenSet {
    pub fn contains(&self, raw_line: &str) -> bool {
        self.lines.contains(raw_line)
    }

    /// Returns `true` when the line was not seen before.
    pub fn insert(&mut self, raw_line: String) -> bool {
        self.lines.insert(raw_line)
    }

    pub(crate) fn len(&self) -> usize {
        self.lines.len()
    }
}

impl FromIterator<String> for SeenSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_discarded() {
        assert!(LineRecord::new(Some("Alice"), "   \n\t ", 0).is_none());
        assert!(LineRecord::new(None, "", 0).is_none());
    }

    #[test]
    fn raw_line_shape_depends_on_speaker() {
        let with_speaker = LineRecord::new(Some(" Alice "), " hello ", 3).expect("record");
        assert_eq!(with_speaker.raw_line(), "Alice\thello");
        assert_eq!(with_speaker.sequence_index(), 3);

        let text_only = LineRecord::new(None, "hello", 0).expect("record");
        assert_eq!(text_only.raw_line(), "hello");
        assert_eq!(text_only.speaker(), None);
    }

    #[test]
    fn empty_speaker_label_falls_back_to_text_only() {
        let record = LineRecord::new(Some("  "), "hi", 0).expect("record");
        assert_eq!(record.raw_line(), "hi");
    }

    #[test]
    fn multi_line_text_is_folded_onto_one_line() {
        let record = LineRecord::new(None, "first\n  second\r\nthird\tfourth", 0).expect("record");
        assert_eq!(record.text(), "first second third fourth");
    }

    #[test]
    fn speaker_elapsed_suffix_is_removed() {
        assert_eq!(clean_speaker_label("Alice 1 時間 30 分間 45 秒間"), "Alice");
        assert_eq!(clean_speaker_label("山田 太郎 12 秒"), "山田 太郎");
        assert_eq!(clean_speaker_label("Bob 5 minutes"), "Bob");
        assert_eq!(clean_speaker_label("Agent 007"), "Agent 007");
        assert_eq!(clean_speaker_label("Carol"), "Carol");
    }

    #[test]
    fn at_index_keeps_content() {
        let record = LineRecord::new(Some("Bob"), "hi", 0).expect("record");
        let stamped = record.clone().at_index(42);
        assert_eq!(stamped.sequence_index(), 42);
        assert_eq!(stamped.raw_line(), record.raw_line());
    }

    #[test]
    fn seen_set_reports_first_insert_only() {
        let mut seen = SeenSet::default();
        assert!(seen.insert("Alice\thello".to_string()));
        assert!(!seen.insert("Alice\thello".to_string()));
        assert!(seen.contains("Alice\thello"));
        assert_eq!(seen.len(), 1);
    }
}
