mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use scrollharvest_core::checkpoint::CheckpointStore;
use scrollharvest_core::collect::{CancelToken, CollectionLoop};
use scrollharvest_core::config::{
    BrowserSettings, DEFAULT_CONFIG_FILE, HarvestConfig, RunOverrides, ignored_on_resume,
    load_config, resolve_browser, resolve_files, resolve_finalize, resolve_runtime,
    resolve_state_file, resolve_target,
};
use scrollharvest_core::dedupe::{DedupeMode, FinalizeReport, finalize};
use scrollharvest_core::doctor::diagnose;
use scrollharvest_core::error::HarvestError;
use scrollharvest_core::raw::{RawAppender, discard_previous_output};
use scrollharvest_core::record::SeenSet;
use scrollharvest_core::resume::resume;
use scrollharvest_core::state::{CollectionState, new_run_id};
use scrollharvest_core::webdriver::{WebDriverConfig, WebDriverPage};
use tracing::{error, info, warn};

use crate::logging::{LogLevel, RunLog};

#[derive(Debug, Parser)]
#[command(
    name = "scrollharvest",
    version,
    about = "Collect every line of a virtualised scrolling list, with checkpointed resume"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Scroll the target and collect new lines into the raw output")]
    Run(RunArgs),
    #[command(about = "Deduplicate an existing raw output into the final output")]
    Finalize(FinalizeArgs),
    #[command(about = "Check selectors against the live page without collecting")]
    Doctor(DoctorArgs),
}

#[derive(Debug, Args)]
struct TargetArgs {
    #[arg(long, value_name = "URL")]
    url: Option<String>,
    #[arg(long, value_name = "SELECTOR", help = "Scrollable container element")]
    container: Option<String>,
    #[arg(long, value_name = "SELECTOR", help = "Text element of one line")]
    line_selector: Option<String>,
    #[arg(long, value_name = "SELECTOR", help = "Entry element pairing speaker and text")]
    entry_selector: Option<String>,
    #[arg(long, value_name = "SELECTOR", help = "Speaker label inside an entry")]
    speaker_selector: Option<String>,
    #[arg(long, help = "Collect text only, without speaker labels")]
    text_only: bool,
}

#[derive(Debug, Args)]
struct BrowserArgs {
    #[arg(long, value_name = "URL", help = "WebDriver endpoint (chromedriver)")]
    webdriver_url: Option<String>,
    #[arg(long, overrides_with = "no_headless", help = "Launch the browser headless (default)")]
    headless: bool,
    #[arg(long, overrides_with = "headless")]
    no_headless: bool,
    #[arg(long, help = "Attach to a browser started with remote debugging")]
    connect_existing: bool,
    #[arg(long, value_name = "PORT")]
    debug_port: Option<u16>,
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[command(flatten)]
    browser: BrowserArgs,
    #[arg(long, value_name = "PATH")]
    output_raw: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output_final: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
    #[arg(long, help = "Continue the run recorded in the state file")]
    resume: bool,
    #[arg(long, value_name = "N")]
    max_idle_scrolls: Option<u32>,
    #[arg(long, value_name = "PX", allow_hyphen_values = true)]
    scroll_step: Option<i64>,
    #[arg(long, value_name = "MS")]
    scroll_interval_ms: Option<u64>,
    #[arg(long, value_name = "N")]
    checkpoint_interval: Option<u32>,
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,
    #[arg(long, value_name = "MS")]
    retry_wait_ms: Option<u64>,
    #[arg(long, value_name = "MODE", value_parser = parse_dedupe_mode)]
    dedupe_mode: Option<DedupeMode>,
    #[arg(long, overrides_with = "no_finalize", help = "Finalize after a completed run (default)")]
    finalize: bool,
    #[arg(long, overrides_with = "finalize")]
    no_finalize: bool,
}

#[derive(Debug, Args)]
struct FinalizeArgs {
    #[arg(long, value_name = "PATH")]
    output_raw: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output_final: Option<PathBuf>,
    #[arg(long, value_name = "MODE", value_parser = parse_dedupe_mode)]
    dedupe_mode: Option<DedupeMode>,
}

#[derive(Debug, Args)]
struct DoctorArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[command(flatten)]
    browser: BrowserArgs,
}

fn parse_dedupe_mode(value: &str) -> Result<DedupeMode, String> {
    value.parse().map_err(|error: HarvestError| error.to_string())
}

fn flag_pair(on: bool, off: bool) -> Option<bool> {
    if on {
        Some(true)
    } else if off {
        Some(false)
    } else {
        None
    }
}

impl TargetArgs {
    fn apply(&self, overrides: &mut RunOverrides) {
        overrides.url = self.url.clone();
        overrides.container = self.container.clone();
        overrides.line_selector = self.line_selector.clone();
        overrides.entry_selector = self.entry_selector.clone();
        overrides.speaker_selector = self.speaker_selector.clone();
        overrides.text_only = self.text_only.then_some(true);
    }
}

impl BrowserArgs {
    fn apply(&self, overrides: &mut RunOverrides) {
        overrides.webdriver_url = self.webdriver_url.clone();
        overrides.headless = flag_pair(self.headless, self.no_headless);
        overrides.connect_existing = self.connect_existing.then_some(true);
        overrides.debug_port = self.debug_port;
        overrides.timeout_ms = self.timeout_ms;
    }
}

impl RunArgs {
    fn overrides(&self) -> RunOverrides {
        let mut overrides = RunOverrides {
            max_idle_scrolls: self.max_idle_scrolls,
            scroll_step: self.scroll_step,
            scroll_interval_ms: self.scroll_interval_ms,
            checkpoint_interval: self.checkpoint_interval,
            max_retries: self.max_retries,
            retry_wait_ms: self.retry_wait_ms,
            dedupe_mode: self.dedupe_mode,
            raw_output: self.output_raw.clone(),
            final_output: self.output_final.clone(),
            state_file: self.state_file.clone(),
            log_file: self.log_file.clone(),
            finalize: flag_pair(self.finalize, self.no_finalize),
            ..RunOverrides::default()
        };
        self.target.apply(&mut overrides);
        self.browser.apply(&mut overrides);
        overrides
    }
}

impl DoctorArgs {
    fn overrides(&self) -> RunOverrides {
        let mut overrides = RunOverrides::default();
        self.target.apply(&mut overrides);
        self.browser.apply(&mut overrides);
        overrides
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    let run_log = logging::init(cli.log_level).unwrap_or_else(|error| {
        eprintln!("warning: {error:#}, continuing without logs");
        RunLog::default()
    });

    let result = match cli.command {
        Commands::Run(args) => run_collect(&cli.config, &args, &run_log),
        Commands::Finalize(args) => run_finalize(&cli.config, &args),
        Commands::Doctor(args) => run_doctor(&cli.config, &args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(code = error.code(), exit_code = error.exit_code(), "{error}");
            ExitCode::from(error.exit_code())
        }
    }
}

fn load_harvest_config(path: &Path) -> Result<HarvestConfig, HarvestError> {
    load_config(path).map_err(|error| HarvestError::Configuration(format!("{error:#}")))
}

fn connect_browser(browser: &BrowserSettings) -> Result<WebDriverPage, HarvestError> {
    WebDriverPage::connect(WebDriverConfig::from_settings(browser))
        .map_err(|error| HarvestError::Unexpected(format!("{error:#}")))
}

fn run_collect(config_path: &Path, args: &RunArgs, run_log: &RunLog) -> Result<(), HarvestError> {
    let config = load_harvest_config(config_path)?;
    let overrides = args.overrides();
    let browser = resolve_browser(&config, &overrides)?;
    let state_file = resolve_state_file(&config, &overrides);
    let finalize_after = resolve_finalize(&config, &overrides);
    let store = CheckpointStore::new(&state_file);

    let (mut state, seen, appender) = if args.resume {
        let mut resumed = resume(&state_file, overrides.raw_output.as_deref())?;
        for field in ignored_on_resume(&resumed.state, &overrides) {
            warn!(field, "ignoring command-line value on resume, the checkpoint keeps its own");
        }
        if let Some(final_output) = &overrides.final_output {
            resumed.state.files.final_output = final_output.clone();
        }
        (resumed.state, resumed.seen, resumed.appender)
    } else {
        let target = resolve_target(&config, &overrides, browser.connect_existing)?;
        let runtime = resolve_runtime(&config, &overrides)?;
        let files = resolve_files(&config, &overrides);
        let mut state = CollectionState::new(new_run_id(), target, files, runtime);
        // The new run's checkpoint replaces any previous one before the old raw output goes.
        store.save(&state)?;
        match open_fresh_output(&state) {
            Ok(appender) => (state, SeenSet::default(), appender),
            Err(error) => {
                abandon_before_loop(&store, &mut state, &error);
                return Err(error);
            }
        }
    };

    if let Err(error) = run_log.attach(&state.files.log_file) {
        warn!(error = %format!("{error:#}"), "run log disabled");
    }
    info!(
        run_id = %state.run_id,
        resume = args.resume,
        state_file = %state_file.display(),
        "starting run"
    );

    let (cancel, mut page) = match prepare_session(&browser) {
        Ok(session) => session,
        Err(error) => {
            // A resumed run's checkpoint and raw output are untouched, so it stays resumable.
            if !args.resume {
                abandon_before_loop(&store, &mut state, &error);
            }
            return Err(error);
        }
    };
    let outcome = CollectionLoop::new(&mut page, store, appender, cancel)
        .resuming(args.resume)
        .run(state, seen);
    drop(page);
    if let Some(error) = outcome.error {
        return Err(error);
    }

    if finalize_after {
        let files = &outcome.state.files;
        let report = finalize(
            &files.raw_output,
            &files.final_output,
            outcome.state.runtime.dedupe_mode,
        )?;
        print_finalize_report(&report);
    }
    Ok(())
}

fn open_fresh_output(state: &CollectionState) -> Result<RawAppender, HarvestError> {
    discard_previous_output(&state.files.raw_output)?;
    RawAppender::open(&state.files.raw_output)
}

fn prepare_session(browser: &BrowserSettings) -> Result<(CancelToken, WebDriverPage), HarvestError> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).map_err(|error| {
        HarvestError::Unexpected(format!("failed to install Ctrl-C handler: {error}"))
    })?;
    let page = connect_browser(browser)?;
    Ok((cancel, page))
}

/// Records a failure that happened before the first cycle. Best effort: the
/// original error is what the caller reports.
fn abandon_before_loop(store: &CheckpointStore, state: &mut CollectionState, error: &HarvestError) {
    state.fail_with(error);
    if let Err(save_error) = store.save(state) {
        error!(error = %save_error, "failed to record the failed start in the checkpoint");
    }
}

fn run_finalize(config_path: &Path, args: &FinalizeArgs) -> Result<(), HarvestError> {
    let config = load_harvest_config(config_path)?;
    let overrides = RunOverrides {
        raw_output: args.output_raw.clone(),
        final_output: args.output_final.clone(),
        ..RunOverrides::default()
    };
    let files = resolve_files(&config, &overrides);
    let mode = args
        .dedupe_mode
        .or(config.collect.dedupe_mode)
        .unwrap_or_default();
    let report = finalize(&files.raw_output, &files.final_output, mode)?;
    print_finalize_report(&report);
    Ok(())
}

fn run_doctor(config_path: &Path, args: &DoctorArgs) -> Result<(), HarvestError> {
    let config = load_harvest_config(config_path)?;
    let overrides = args.overrides();
    let browser = resolve_browser(&config, &overrides)?;
    let target = resolve_target(&config, &overrides, browser.connect_existing)?;

    let mut page = connect_browser(&browser)?;
    let report = diagnose(&mut page, &target)?;
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|error| HarvestError::Unexpected(format!("failed to render report: {error}")))?;
    println!("{rendered}");

    if !report.container_found {
        return Err(HarvestError::TargetNotFound(format!(
            "container not found: {}",
            report.container_selector
        )));
    }
    Ok(())
}

fn print_finalize_report(report: &FinalizeReport) {
    println!(
        "finalize total={} unique={} output={}",
        report.total,
        report.unique,
        report.output.display()
    );
}
