use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::HarvestError;
use crate::record::LineRecord;

/// Append-only sink for every new record. Each append is flushed and synced
/// before it returns, so counters updated afterwards never run ahead of disk.
#[derive(Debug)]
pub struct RawAppender {
    path: PathBuf,
    file: Option<File>,
}

impl RawAppender {
    /// Lazily opens `path` on the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// Opens `path` in create-or-append mode right away. Existing content is kept.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let mut appender = Self::new(path);
        appender.ensure_open()?;
        Ok(appender)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &LineRecord) -> Result<(), HarvestError> {
        let mut line = record.raw_line();
        line.push('\n');
        let path = self.path.clone();
        let file = self.ensure_open()?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data())
            .map_err(|error| HarvestError::write_failure(path, error))
    }

    fn ensure_open(&mut self) -> Result<&mut File, HarvestError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .map_err(|error| HarvestError::write_failure(parent, error))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|error| HarvestError::write_failure(&self.path, error))?;
            debug!(path = %self.path.display(), "opened raw output for append");
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| HarvestError::Unexpected("raw output handle missing".to_string()))
    }
}

/// Every non-blank line of the raw output, in file order. A missing file reads as empty.
pub fn read_raw_lines(path: &Path) -> io::Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error),
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Clears raw output left behind by an earlier run before a fresh run starts.
/// Returns `true` when a file was removed.
pub fn discard_previous_output(path: &Path) -> Result<bool, HarvestError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "removed raw output from a previous run");
            Ok(true)
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(HarvestError::write_failure(path, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_one_line_per_record_without_truncating() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("out").join("raw.txt");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "earlier\n").expect("seed");

        let mut appender = RawAppender::new(&path);
        appender
            .append(&LineRecord::new(Some("Alice"), "hello", 0).expect("record"))
            .expect("append");
        appender
            .append(&LineRecord::new(None, "plain", 1).expect("record"))
            .expect("append");

        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "earlier\nAlice\thello\nplain\n"
        );
    }

    #[test]
    fn lazy_appender_creates_nothing_until_first_record() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("raw.txt");
        let appender = RawAppender::new(&path);
        assert!(!path.exists());
        assert_eq!(appender.path(), path.as_path());

        RawAppender::open(&path).expect("open eagerly");
        assert!(path.exists());
    }

    #[test]
    fn unwritable_destination_is_a_write_failure() {
        let temp = tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "file, not a directory").expect("write blocker");
        let mut appender = RawAppender::new(blocker.join("raw.txt"));
        let error = appender
            .append(&LineRecord::new(None, "x", 0).expect("record"))
            .expect_err("must fail");
        assert_eq!(error.exit_code(), 40);
    }

    #[test]
    fn read_raw_lines_skips_blank_lines_and_missing_files() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("raw.txt");
        assert!(read_raw_lines(&path).expect("missing").is_empty());

        fs::write(&path, "a\n\nb\n").expect("write");
        assert_eq!(read_raw_lines(&path).expect("read"), vec!["a", "b"]);
    }

    #[test]
    fn discard_previous_output_is_quiet_when_absent() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("raw.txt");
        assert!(!discard_previous_output(&path).expect("absent"));
        fs::write(&path, "old\n").expect("write");
        assert!(discard_previous_output(&path).expect("present"));
        assert!(!path.exists());
    }
}
