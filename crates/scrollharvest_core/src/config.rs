use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dedupe::DedupeMode;
use crate::error::HarvestError;
use crate::extract::{DEFAULT_ENTRY_SELECTOR, DEFAULT_LINE_SELECTOR, DEFAULT_SPEAKER_SELECTOR};
use crate::state::{CollectionState, Files, RuntimeSnapshot, Target};

pub const DEFAULT_CONFIG_FILE: &str = "scrollharvest.toml";
pub const WEBDRIVER_URL_ENV: &str = "SCROLLHARVEST_WEBDRIVER_URL";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

pub const DEFAULT_MAX_IDLE_SCROLLS: u32 = 8;
pub const DEFAULT_SCROLL_STEP: i64 = 400;
pub const DEFAULT_SCROLL_INTERVAL_MS: u64 = 600;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_WAIT_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DEBUG_PORT: u16 = 9222;
pub const DEFAULT_RAW_OUTPUT: &str = "./raw_output.txt";
pub const DEFAULT_FINAL_OUTPUT: &str = "./final_output.txt";
pub const DEFAULT_STATE_FILE: &str = "./state.json";
pub const RUN_LOG_FILE_NAME: &str = "run.log";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HarvestConfig {
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub collect: CollectSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub browser: BrowserSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TargetSection {
    pub url: Option<String>,
    pub container: Option<String>,
    pub line_selector: Option<String>,
    pub entry_selector: Option<String>,
    pub speaker_selector: Option<String>,
    pub text_only: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CollectSection {
    pub max_idle_scrolls: Option<u32>,
    pub scroll_step: Option<i64>,
    pub scroll_interval_ms: Option<u64>,
    pub checkpoint_interval: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_wait_ms: Option<u64>,
    pub dedupe_mode: Option<DedupeMode>,
    pub timeout_ms: Option<u64>,
    pub finalize: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OutputSection {
    pub raw: Option<PathBuf>,
    #[serde(rename = "final")]
    pub final_output: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BrowserSection {
    pub webdriver_url: Option<String>,
    pub headless: Option<bool>,
    pub connect_existing: Option<bool>,
    pub debug_port: Option<u16>,
}

impl HarvestConfig {
    /// Resolve the WebDriver endpoint: env SCROLLHARVEST_WEBDRIVER_URL > config > default.
    pub fn webdriver_url(&self) -> String {
        if let Ok(value) = env::var(WEBDRIVER_URL_ENV) {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.browser
            .webdriver_url
            .clone()
            .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string())
    }
}

/// Load and parse a HarvestConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<HarvestConfig> {
    if !config_path.exists() {
        return Ok(HarvestConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: HarvestConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Values given explicitly on the command line. `None` defers to the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub url: Option<String>,
    pub container: Option<String>,
    pub line_selector: Option<String>,
    pub entry_selector: Option<String>,
    pub speaker_selector: Option<String>,
    pub text_only: Option<bool>,
    pub max_idle_scrolls: Option<u32>,
    pub scroll_step: Option<i64>,
    pub scroll_interval_ms: Option<u64>,
    pub checkpoint_interval: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_wait_ms: Option<u64>,
    pub dedupe_mode: Option<DedupeMode>,
    pub timeout_ms: Option<u64>,
    pub raw_output: Option<PathBuf>,
    pub final_output: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub webdriver_url: Option<String>,
    pub headless: Option<bool>,
    pub connect_existing: Option<bool>,
    pub debug_port: Option<u16>,
    pub finalize: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    pub connect_existing: bool,
    pub debug_port: u16,
    pub timeout_ms: u64,
}

fn pick<T: Clone>(flag: &Option<T>, file: &Option<T>) -> Option<T> {
    flag.clone().or_else(|| file.clone())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn config_error(message: impl Into<String>) -> HarvestError {
    HarvestError::Configuration(message.into())
}

pub fn resolve_target(
    config: &HarvestConfig,
    overrides: &RunOverrides,
    connect_existing: bool,
) -> Result<Target, HarvestError> {
    let section = &config.target;
    let url = non_blank(pick(&overrides.url, &section.url));
    if url.is_none() && !connect_existing {
        return Err(config_error(
            "--url is required unless --connect-existing or --resume is given",
        ));
    }
    let container_selector = non_blank(pick(&overrides.container, &section.container))
        .ok_or_else(|| config_error("--container is required"))?;

    let text_only = pick(&overrides.text_only, &section.text_only).unwrap_or(false);
    let line_selector = non_blank(pick(&overrides.line_selector, &section.line_selector));
    if text_only && line_selector.is_none() {
        return Err(config_error("--text-only requires --line-selector"));
    }

    Ok(Target {
        url,
        container_selector,
        line_selector: line_selector.unwrap_or_else(|| DEFAULT_LINE_SELECTOR.to_string()),
        text_only,
        entry_selector: (!text_only).then(|| {
            non_blank(pick(&overrides.entry_selector, &section.entry_selector))
                .unwrap_or_else(|| DEFAULT_ENTRY_SELECTOR.to_string())
        }),
        speaker_selector: (!text_only).then(|| {
            non_blank(pick(&overrides.speaker_selector, &section.speaker_selector))
                .unwrap_or_else(|| DEFAULT_SPEAKER_SELECTOR.to_string())
        }),
    })
}

pub fn resolve_runtime(
    config: &HarvestConfig,
    overrides: &RunOverrides,
) -> Result<RuntimeSnapshot, HarvestError> {
    let section = &config.collect;
    let runtime = RuntimeSnapshot {
        max_idle_scrolls: pick(&overrides.max_idle_scrolls, &section.max_idle_scrolls)
            .unwrap_or(DEFAULT_MAX_IDLE_SCROLLS),
        scroll_step: pick(&overrides.scroll_step, &section.scroll_step)
            .unwrap_or(DEFAULT_SCROLL_STEP),
        scroll_interval_ms: pick(&overrides.scroll_interval_ms, &section.scroll_interval_ms)
            .unwrap_or(DEFAULT_SCROLL_INTERVAL_MS),
        max_retries: pick(&overrides.max_retries, &section.max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES),
        retry_wait_ms: pick(&overrides.retry_wait_ms, &section.retry_wait_ms)
            .unwrap_or(DEFAULT_RETRY_WAIT_MS),
        dedupe_mode: pick(&overrides.dedupe_mode, &section.dedupe_mode).unwrap_or_default(),
        checkpoint_interval: pick(&overrides.checkpoint_interval, &section.checkpoint_interval)
            .unwrap_or(crate::state::DEFAULT_CHECKPOINT_INTERVAL),
    };

    if runtime.max_idle_scrolls == 0 {
        return Err(config_error("max_idle_scrolls must be at least 1"));
    }
    if runtime.checkpoint_interval == 0 {
        return Err(config_error("checkpoint_interval must be at least 1"));
    }
    if runtime.scroll_step == 0 {
        return Err(config_error("scroll_step must not be 0"));
    }
    Ok(runtime)
}

pub fn resolve_files(config: &HarvestConfig, overrides: &RunOverrides) -> Files {
    let section = &config.output;
    let raw_output = pick(&overrides.raw_output, &section.raw)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RAW_OUTPUT));
    let final_output = pick(&overrides.final_output, &section.final_output)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FINAL_OUTPUT));
    let log_file = pick(&overrides.log_file, &section.log_file)
        .unwrap_or_else(|| default_log_file(&raw_output));
    Files {
        raw_output,
        final_output,
        log_file,
    }
}

/// `run.log` next to the raw output.
pub fn default_log_file(raw_output: &Path) -> PathBuf {
    raw_output
        .parent()
        .map(|parent| parent.join(RUN_LOG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(RUN_LOG_FILE_NAME))
}

pub fn resolve_state_file(config: &HarvestConfig, overrides: &RunOverrides) -> PathBuf {
    pick(&overrides.state_file, &config.output.state_file)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
}

pub fn resolve_browser(
    config: &HarvestConfig,
    overrides: &RunOverrides,
) -> Result<BrowserSettings, HarvestError> {
    let section = &config.browser;
    let timeout_ms =
        pick(&overrides.timeout_ms, &config.collect.timeout_ms).unwrap_or(DEFAULT_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(config_error("timeout_ms must be at least 1"));
    }
    let webdriver_url = non_blank(overrides.webdriver_url.clone())
        .unwrap_or_else(|| config.webdriver_url());
    if !webdriver_url.starts_with("http://") && !webdriver_url.starts_with("https://") {
        return Err(config_error(format!(
            "webdriver url must start with http:// or https://: {webdriver_url}"
        )));
    }
    Ok(BrowserSettings {
        webdriver_url,
        headless: pick(&overrides.headless, &section.headless).unwrap_or(true),
        connect_existing: pick(&overrides.connect_existing, &section.connect_existing)
            .unwrap_or(false),
        debug_port: pick(&overrides.debug_port, &section.debug_port).unwrap_or(DEFAULT_DEBUG_PORT),
        timeout_ms,
    })
}

pub fn resolve_finalize(config: &HarvestConfig, overrides: &RunOverrides) -> bool {
    pick(&overrides.finalize, &config.collect.finalize).unwrap_or(true)
}

/// Names of command-line values a resumed run ignores because the checkpoint
/// already fixes them and they disagree with it.
pub fn ignored_on_resume(state: &CollectionState, overrides: &RunOverrides) -> Vec<&'static str> {
    fn differs<T: PartialEq>(flag: &Option<T>, recorded: &T) -> bool {
        flag.as_ref().is_some_and(|value| value != recorded)
    }

    let target = &state.target;
    let runtime = &state.runtime;
    let mut ignored = Vec::new();
    if overrides
        .url
        .as_ref()
        .is_some_and(|url| target.url.as_ref() != Some(url))
    {
        ignored.push("url");
    }
    if differs(&overrides.container, &target.container_selector) {
        ignored.push("container");
    }
    if differs(&overrides.line_selector, &target.line_selector) {
        ignored.push("line_selector");
    }
    if overrides
        .entry_selector
        .as_ref()
        .is_some_and(|selector| target.entry_selector.as_ref() != Some(selector))
    {
        ignored.push("entry_selector");
    }
    if overrides
        .speaker_selector
        .as_ref()
        .is_some_and(|selector| target.speaker_selector.as_ref() != Some(selector))
    {
        ignored.push("speaker_selector");
    }
    if differs(&overrides.text_only, &target.text_only) {
        ignored.push("text_only");
    }
    if differs(&overrides.max_idle_scrolls, &runtime.max_idle_scrolls) {
        ignored.push("max_idle_scrolls");
    }
    if differs(&overrides.scroll_step, &runtime.scroll_step) {
        ignored.push("scroll_step");
    }
    if differs(&overrides.scroll_interval_ms, &runtime.scroll_interval_ms) {
        ignored.push("scroll_interval_ms");
    }
    if differs(&overrides.checkpoint_interval, &runtime.checkpoint_interval) {
        ignored.push("checkpoint_interval");
    }
    if differs(&overrides.max_retries, &runtime.max_retries) {
        ignored.push("max_retries");
    }
    if differs(&overrides.retry_wait_ms, &runtime.retry_wait_ms) {
        ignored.push("retry_wait_ms");
    }
    if differs(&overrides.dedupe_mode, &runtime.dedupe_mode) {
        ignored.push("dedupe_mode");
    }
    ignored
}
