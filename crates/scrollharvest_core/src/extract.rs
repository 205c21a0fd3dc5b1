use crate::page::{AdapterError, ElementHandle, PageAdapter};
use crate::record::LineRecord;
use crate::state::Target;

pub const DEFAULT_LINE_SELECTOR: &str = r#"[class^="entryText-"]"#;
pub const DEFAULT_ENTRY_SELECTOR: &str = r#"[class^="baseEntry-"]"#;
pub const DEFAULT_SPEAKER_SELECTOR: &str = r#"[id^="timestampSpeakerAriaLabel-"]"#;

/// How visible elements turn into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionMode {
    TextOnly {
        line_selector: String,
    },
    /// Each entry element pairs its first speaker element with its first text element.
    Speaker {
        entry_selector: String,
        speaker_selector: String,
        line_selector: String,
    },
}

/// Records derived from one query, plus how many elements the query matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub records: Vec<LineRecord>,
    pub matched_elements: usize,
}

impl ExtractionMode {
    pub fn from_target(target: &Target) -> Self {
        if target.text_only {
            return Self::TextOnly {
                line_selector: target.line_selector.clone(),
            };
        }
        Self::Speaker {
            entry_selector: target
                .entry_selector
                .clone()
                .unwrap_or_else(|| DEFAULT_ENTRY_SELECTOR.to_string()),
            speaker_selector: target
                .speaker_selector
                .clone()
                .unwrap_or_else(|| DEFAULT_SPEAKER_SELECTOR.to_string()),
            line_selector: target.line_selector.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TextOnly { .. } => "text_only",
            Self::Speaker { .. } => "with_speaker",
        }
    }

    pub fn line_selector(&self) -> &str {
        match self {
            Self::TextOnly { line_selector } | Self::Speaker { line_selector, .. } => line_selector,
        }
    }

    /// Reads every currently rendered record under `container`, in document
    /// order. Sequence indexes are positions within this query.
    pub fn extract<A: PageAdapter + ?Sized>(
        &self,
        adapter: &mut A,
        container: &ElementHandle,
    ) -> Result<Extracted, AdapterError> {
        let mut extracted = Extracted::default();
        match self {
            Self::TextOnly { line_selector } => {
                let lines = adapter.query_all(container, line_selector)?;
                extracted.matched_elements = lines.len();
                for line in &lines {
                    let text = adapter.read_text(line)?;
                    let index = u64::try_from(extracted.records.len()).unwrap_or(u64::MAX);
                    if let Some(record) = LineRecord::new(None, &text, index) {
                        extracted.records.push(record);
                    }
                }
            }
            Self::Speaker {
                entry_selector,
                speaker_selector,
                line_selector,
            } => {
                let entries = adapter.query_all(container, entry_selector)?;
                extracted.matched_elements = entries.len();
                for entry in &entries {
                    let speaker = first_text(adapter, entry, speaker_selector)?;
                    let Some(text) = first_text(adapter, entry, line_selector)? else {
                        continue;
                    };
                    let index = u64::try_from(extracted.records.len()).unwrap_or(u64::MAX);
                    if let Some(record) = LineRecord::new(speaker.as_deref(), &text, index) {
                        extracted.records.push(record);
                    }
                }
            }
        }
        Ok(extracted)
    }
}

pub(crate) fn first_text<A: PageAdapter + ?Sized>(
    adapter: &mut A,
    scope: &ElementHandle,
    selector: &str,
) -> Result<Option<String>, AdapterError> {
    match adapter.query_all(scope, selector)?.first() {
        Some(element) => adapter.read_text(element).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::testing::{ENTRY, ScriptedPage, SPEAKER, TEXT};

    fn speaker_mode() -> ExtractionMode {
        ExtractionMode::Speaker {
            entry_selector: ENTRY.to_string(),
            speaker_selector: SPEAKER.to_string(),
            line_selector: TEXT.to_string(),
        }
    }

    #[test]
    fn speaker_mode_pairs_labels_with_text() {
        let mut page = ScriptedPage::new(
            vec![
                (Some("Alice 3 分間"), "hello"),
                (None, "narration"),
                (Some("Bob"), "   "),
                (Some("Bob"), "hi"),
            ],
            10,
        );
        let container = ElementHandle::new("container");
        let extracted = speaker_mode()
            .extract(&mut page, &container)
            .expect("extract");

        assert_eq!(extracted.matched_elements, 4);
        let lines: Vec<String> = extracted.records.iter().map(LineRecord::raw_line).collect();
        assert_eq!(lines, vec!["Alice\thello", "narration", "Bob\thi"]);
        assert_eq!(extracted.records[2].sequence_index(), 2);
    }

    #[test]
    fn text_only_mode_reads_line_elements_directly() {
        let mut page = ScriptedPage::new(vec![(Some("Alice"), "one"), (Some("Bob"), "two")], 10);
        let mode = ExtractionMode::TextOnly {
            line_selector: TEXT.to_string(),
        };
        let extracted = mode
            .extract(&mut page, &ElementHandle::new("container"))
            .expect("extract");
        let lines: Vec<String> = extracted.records.iter().map(LineRecord::raw_line).collect();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn only_the_rendered_window_is_visible() {
        let mut page = ScriptedPage::numbered(10, 3);
        let extracted = speaker_mode()
            .extract(&mut page, &ElementHandle::new("container"))
            .expect("extract");
        assert_eq!(extracted.records.len(), 3);
        assert_eq!(extracted.records[0].raw_line(), "Alice\tline 0");
    }

    #[test]
    fn target_without_mode_selectors_uses_defaults() {
        let target = Target {
            url: None,
            container_selector: "#chat".to_string(),
            line_selector: DEFAULT_LINE_SELECTOR.to_string(),
            text_only: false,
            entry_selector: None,
            speaker_selector: None,
        };
        match ExtractionMode::from_target(&target) {
            ExtractionMode::Speaker {
                entry_selector,
                speaker_selector,
                ..
            } => {
                assert_eq!(entry_selector, DEFAULT_ENTRY_SELECTOR);
                assert_eq!(speaker_selector, DEFAULT_SPEAKER_SELECTOR);
            }
            other => panic!("unexpected mode: {other:?}"),
        }
    }
}
