//! External `diff` invocation and hunk-header parsing.
//!
//! The relocator needs unified diffs with zero context (`diff -U 0`) between
//! two text versions, either of which may exist only in memory. In-memory
//! content is materialized to a temp file for the duration of the call and
//! released through a [`Janitor`].

use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tempfile::NamedTempFile;

use crate::janitor::Janitor;
use crate::runner::{CommandRunner, CommandSpec, OptStyle, RunnerError};

/// One differing range between a base and a current version of a text.
///
/// All line numbers are 1-based; both sides are half-open `[start, end)`.
/// A pure insertion has `base_start == base_end`, a pure deletion has
/// `current_start == current_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub base_start: u32,
    pub base_end: u32,
    pub current_start: u32,
    pub current_end: u32,
}

/// Content handed to [`DiffDriver::get_hunks`]: a file on disk or a string
/// in memory.
#[derive(Debug, Clone)]
pub enum Content {
    Path(PathBuf),
    Immediate(String),
}

impl std::fmt::Display for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Content::Path(path) => write!(f, "{}", path.display()),
            Content::Immediate(text) => write!(f, "<in-memory content, {} bytes>", text.len()),
        }
    }
}

#[derive(Debug)]
pub enum DiffError {
    /// `diff` exited with something other than 0 (same) or 1 (different).
    DiffFailure {
        base: String,
        current: String,
        exit_code: i32,
    },
    /// Materializing in-memory content to a temp file failed.
    TempFile(std::io::Error),
    Runner(RunnerError),
}

impl std::fmt::Display for DiffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffError::DiffFailure {
                base,
                current,
                exit_code,
            } => write!(
                f,
                "diff of {base} against {current} failed with exit code {exit_code}"
            ),
            DiffError::TempFile(err) => write!(f, "could not materialize content: {err}"),
            DiffError::Runner(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DiffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiffError::TempFile(err) => Some(err),
            DiffError::Runner(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RunnerError> for DiffError {
    fn from(err: RunnerError) -> Self {
        DiffError::Runner(err)
    }
}

static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());

/// Drives the external `diff` program.
#[derive(Debug)]
pub struct DiffDriver {
    runner: CommandRunner,
}

impl Default for DiffDriver {
    fn default() -> Self {
        Self::new("diff")
    }
}

impl DiffDriver {
    pub fn new(program: impl Into<std::ffi::OsString>) -> Self {
        Self {
            runner: CommandRunner::new(
                CommandSpec::new(program).opt_style(OptStyle::OneDash),
            ),
        }
    }

    pub fn with_runner(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Compute the changed ranges between `base` and `current`.
    ///
    /// Runs `diff -U 0` and parses each hunk header. Exit code 1 just means
    /// "differences found"; only codes above 1 are failures.
    pub fn get_hunks(&self, base: &Content, current: &Content) -> Result<Vec<Change>, DiffError> {
        let mut janitor = Janitor::new();
        let result = self.get_hunks_inner(base, current, &mut janitor);
        let cleanup = janitor.clean_up();
        if let Err(err) = cleanup {
            // Leaked temp files don't invalidate a successful diff.
            log::warn!("diff temp cleanup incomplete: {err}");
        }
        result
    }

    fn get_hunks_inner(
        &self,
        base: &Content,
        current: &Content,
        janitor: &mut Janitor,
    ) -> Result<Vec<Change>, DiffError> {
        let base_path = materialize(base, janitor)?;
        let current_path = materialize(current, janitor)?;

        let (code, stdout) = self
            .runner
            .invoke()
            .opt("U", "0")
            .arg(&base_path)
            .arg(&current_path)
            .output()?;
        if code != 0 && code != 1 {
            return Err(DiffError::DiffFailure {
                base: base.to_string(),
                current: current.to_string(),
                exit_code: code,
            });
        }

        Ok(stdout
            .lines()
            .filter_map(|line| HUNK_HEADER.captures(line))
            .map(|captures| {
                let base_range = side_range(&captures, 1, 2);
                let current_range = side_range(&captures, 3, 4);
                Change {
                    base_start: base_range.0,
                    base_end: base_range.1,
                    current_start: current_range.0,
                    current_end: current_range.1,
                }
            })
            .collect())
    }
}

/// Decode one side of a hunk header (`S[,L]`) into a half-open range.
///
/// `L` omitted means one line. `L == 0` marks the position *after* which the
/// other side's lines sit, so the empty range starts at `S + 1`.
fn side_range(captures: &regex::Captures<'_>, start_group: usize, len_group: usize) -> (u32, u32) {
    let start: u32 = captures[start_group].parse().unwrap_or(0);
    let len: Option<u32> = captures
        .get(len_group)
        .map(|m| m.as_str().parse().unwrap_or(0));
    match len {
        Some(0) => (start + 1, start + 1),
        Some(len) => (start, start + len),
        None => (start, start + 1),
    }
}

/// Return a path for the content, writing immediate content to a temp file
/// whose removal is registered with the janitor.
fn materialize(content: &Content, janitor: &mut Janitor) -> Result<PathBuf, DiffError> {
    match content {
        Content::Path(path) => Ok(path.clone()),
        Content::Immediate(text) => {
            let mut file = NamedTempFile::new().map_err(DiffError::TempFile)?;
            file.write_all(text.as_bytes()).map_err(DiffError::TempFile)?;
            file.flush().map_err(DiffError::TempFile)?;
            let (_, path) = file.keep().map_err(|err| DiffError::TempFile(err.error))?;
            let registered = path.clone();
            janitor.add_task(format!("remove {}", registered.display()), move || {
                std::fs::remove_file(&registered)?;
                Ok(())
            });
            Ok(path)
        }
    }
}
