use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupeMode {
    #[default]
    Exact,
    /// Compare after trimming surrounding whitespace; the first original line is kept.
    Trimmed,
}

impl DedupeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Trimmed => "trimmed",
        }
    }

    fn key<'a>(self, line: &'a str) -> &'a str {
        match self {
            Self::Exact => line,
            Self::Trimmed => line.trim(),
        }
    }
}

impl fmt::Display for DedupeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DedupeMode {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "trimmed" | "trim" => Ok(Self::Trimmed),
            other => Err(HarvestError::Configuration(format!(
                "unsupported dedupe mode: {other} (expected exact or trimmed)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Non-blank lines read from the raw output.
    pub total: usize,
    /// Lines written to the final output.
    pub unique: usize,
    pub output: PathBuf,
}

/// Streams `raw_path` into `final_path`, keeping the first occurrence of each
/// line and dropping repeats. The output is written to a sibling temp file and
/// renamed into place, so rerunning over the same input yields identical bytes.
pub fn finalize(
    raw_path: &Path,
    final_path: &Path,
    mode: DedupeMode,
) -> Result<FinalizeReport, HarvestError> {
    let raw = match File::open(raw_path) {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Err(HarvestError::Configuration(format!(
                "raw file not found: {}",
                raw_path.display()
            )));
        }
        Err(error) => {
            return Err(HarvestError::Unexpected(format!(
                "failed to open {}: {error}",
                raw_path.display()
            )));
        }
    };

    if let Some(parent) = final_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|error| HarvestError::write_failure(parent, error))?;
    }
    let temp_path = temp_sibling(final_path);
    let temp = File::create(&temp_path)
        .map_err(|error| HarvestError::write_failure(&temp_path, error))?;

    let result = stream_unique_lines(BufReader::new(raw), BufWriter::new(temp), mode)
        .map_err(|failure| match failure {
            StreamFailure::Read(error) => HarvestError::Unexpected(format!(
                "failed to read {}: {error}",
                raw_path.display()
            )),
            StreamFailure::Write(error) => HarvestError::write_failure(&temp_path, error),
        })
        .and_then(|counts| {
            fs::rename(&temp_path, final_path)
                .map_err(|error| HarvestError::write_failure(final_path, error))?;
            Ok(counts)
        });

    let (total, unique) = match result {
        Ok(counts) => counts,
        Err(error) => {
            let _ = fs::remove_file(&temp_path);
            return Err(error);
        }
    };

    info!(
        raw = %raw_path.display(),
        output = %final_path.display(),
        mode = mode.as_str(),
        total,
        unique,
        "finalized raw output"
    );
    Ok(FinalizeReport {
        total,
        unique,
        output: final_path.to_path_buf(),
    })
}

enum StreamFailure {
    Read(io::Error),
    Write(io::Error),
}

fn stream_unique_lines<R: BufRead>(
    reader: R,
    mut writer: BufWriter<File>,
    mode: DedupeMode,
) -> Result<(usize, usize), StreamFailure> {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    let mut unique = 0usize;
    for line in reader.lines() {
        let line = line.map_err(StreamFailure::Read)?;
        let key = mode.key(&line);
        if key.is_empty() {
            continue;
        }
        total += 1;
        if seen.contains(key) {
            continue;
        }
        seen.insert(key.to_string());
        writeln!(writer, "{line}").map_err(StreamFailure::Write)?;
        unique += 1;
    }
    writer.flush().map_err(StreamFailure::Write)?;
    let file = writer
        .into_inner()
        .map_err(|error| StreamFailure::Write(error.into_error()))?;
    file.sync_all().map_err(StreamFailure::Write)?;
    Ok((total, unique))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
