use serde::Serialize;
use tracing::info;

use crate::error::HarvestError;
use crate::extract::{ExtractionMode, first_text};
use crate::page::PageAdapter;
use crate::record::{clean_speaker_label, normalize_text};
use crate::state::Target;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleEntry {
    pub speaker: String,
    pub text: String,
}

/// Result of probing the configured selectors against the live page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorReport {
    pub container_found: bool,
    pub container_selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_entry: Option<SampleEntry>,
}

/// Opens the target (when a URL is configured) and counts what each selector
/// matches right now. Nothing is scrolled or written.
pub fn diagnose<A: PageAdapter + ?Sized>(
    adapter: &mut A,
    target: &Target,
) -> Result<DoctorReport, HarvestError> {
    if let Some(url) = &target.url
        && adapter.current_url()? != *url
    {
        adapter.open(url)?;
    }

    let mut report = DoctorReport {
        container_selector: target.container_selector.clone(),
        ..DoctorReport::default()
    };
    let Some(container) = adapter.find_container(&target.container_selector)? else {
        info!(selector = %target.container_selector, "container not found");
        return Ok(report);
    };
    report.container_found = true;

    let mode = ExtractionMode::from_target(target);
    report.mode = Some(mode.name());
    match &mode {
        ExtractionMode::TextOnly { line_selector } => {
            report.line_count = Some(adapter.query_all(&container, line_selector)?.len());
            report.line_selector = Some(line_selector.clone());
        }
        ExtractionMode::Speaker {
            entry_selector,
            speaker_selector,
            line_selector,
        } => {
            let entries = adapter.query_all(&container, entry_selector)?;
            report.entry_count = Some(entries.len());
            report.speaker_count = Some(adapter.query_all(&container, speaker_selector)?.len());
            report.text_count = Some(adapter.query_all(&container, line_selector)?.len());
            if let Some(entry) = entries.first() {
                let speaker = first_text(adapter, entry, speaker_selector)?.unwrap_or_default();
                let text = first_text(adapter, entry, line_selector)?.unwrap_or_default();
                report.sample_entry = Some(SampleEntry {
                    speaker: clean_speaker_label(&speaker),
                    text: normalize_text(&text),
                });
            }
            report.entry_selector = Some(entry_selector.clone());
            report.speaker_selector = Some(speaker_selector.clone());
            report.line_selector = Some(line_selector.clone());
        }
    }

    info!(
        mode = mode.name(),
        line_count = ?report.line_count,
        entry_count = ?report.entry_count,
        "selector probe finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::testing::{CONTAINER, ENTRY, SPEAKER, ScriptedPage, TEXT};
    use crate::state::sample_state;

    fn target() -> Target {
        let mut target = sample_state().target;
        target.container_selector = CONTAINER.to_string();
        target.line_selector = TEXT.to_string();
        target.entry_selector = Some(ENTRY.to_string());
        target.speaker_selector = Some(SPEAKER.to_string());
        target
    }

    #[test]
    fn speaker_mode_reports_counts_and_sample() {
        let mut page = ScriptedPage::new(
            vec![
                (Some("Alice 2 分"), "  hello  "),
                (None, "narration"),
                (Some("Bob"), "hi"),
            ],
            10,
        );
        let report = diagnose(&mut page, &target()).expect("diagnose");

        assert!(report.container_found);
        assert_eq!(report.mode, Some("with_speaker"));
        assert_eq!(report.entry_count, Some(3));
        assert_eq!(report.speaker_count, Some(2));
        assert_eq!(report.text_count, Some(3));
        assert_eq!(
            report.sample_entry,
            Some(SampleEntry {
                speaker: "Alice".to_string(),
                text: "hello".to_string(),
            })
        );
        assert_eq!(page.opened.len(), 1);
        assert_eq!(page.scrolls, 0);
    }

    #[test]
    fn text_only_report_uses_camel_case_keys() {
        let mut page = ScriptedPage::numbered(5, 2);
        let mut target = target();
        target.text_only = true;
        let report = diagnose(&mut page, &target).expect("diagnose");

        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["containerFound"], true);
        assert_eq!(value["containerSelector"], CONTAINER);
        assert_eq!(value["mode"], "text_only");
        assert_eq!(value["lineCount"], 2);
        assert!(value.get("entryCount").is_none());
        assert!(value.get("sampleEntry").is_none());
    }

    #[test]
    fn missing_container_is_reported_not_raised() {
        let mut page = ScriptedPage::numbered(5, 2);
        page.container_present = false;
        let report = diagnose(&mut page, &target()).expect("diagnose");

        assert!(!report.container_found);
        assert_eq!(report.mode, None);
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value.as_object().expect("object").len(), 2);
    }
}
