//! Relocating bookmarks across edits.
//!
//! Given a bookmark's last-known `(file, line)`, its marked text, and an
//! optional peg `(commit, line)`, find where the mark sits in the current
//! content. Two strategies run in order: blame pinpointing (exact, when git
//! can track the line) and a diff-hunk projection (approximate, radiating
//! around the projected position). Both fall back to a plain windowed text
//! search before giving up.

use std::path::{Path, PathBuf};

use crate::casefile::{Bookmark, Peg};
use crate::diff::{Change, Content, DiffDriver};
use crate::git::{GitDriver, GitError};

/// How far the plain text search wanders from the expected line.
pub const UNTRACKED_WINDOW_SIZE: u32 = 15;

/// A located bookmark; `line` and `col` are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
    pub col: u32,
}

/// A freshly computed peg. `commit` is absent when the line already matches
/// the base content, so there is nothing to pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedPeg {
    pub line: u32,
    pub commit: Option<String>,
}

/// The current-content line range a pegged line projects into: the best
/// single guess `prime` inside `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub prime: u32,
    pub end: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RelocatorError {
    /// Every strategy ran out; the marked text is nowhere near its line.
    MarkNotFound,
}

impl std::fmt::Display for RelocatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelocatorError::MarkNotFound => write!(f, "marked text not found near its line"),
        }
    }
}

impl std::error::Error for RelocatorError {}

/// Locates bookmarks in current content and computes new pegs for them.
#[derive(Debug)]
pub struct BookmarkRelocator<'a> {
    git: &'a GitDriver,
    diff: &'a DiffDriver,
}

impl<'a> BookmarkRelocator<'a> {
    pub fn new(git: &'a GitDriver, diff: &'a DiffDriver) -> Self {
        Self { git, diff }
    }

    /// Find the bookmark's current `(line, col)` in `content`.
    ///
    /// Strategies run in order and short-circuit on the first hit: blame
    /// pinpoint (peg only), diff-hunk projection (peg only), then a windowed
    /// text search around the bookmark's recorded line. Infrastructure
    /// errors are logged and the next strategy is tried; the only failure is
    /// [`RelocatorError::MarkNotFound`].
    pub fn current_location(
        &self,
        bookmark: &Bookmark,
        content: &str,
    ) -> Result<Location, RelocatorError> {
        let file = Path::new(&bookmark.file);
        let lines: Vec<&str> = content.lines().collect();

        if let Some(peg) = &bookmark.peg {
            // Strategy 1: blame knows exactly where the pegged line went.
            match self
                .git
                .find_current_line_position(file, peg, Some(content))
            {
                Ok(line) => {
                    if let Some(col) = find_in_row(&lines, &bookmark.text, line) {
                        return Ok(self.locate(bookmark, line, col));
                    }
                    log::warn!(
                        "blame pinpointed {}:{line} but the marked text is not there",
                        bookmark.file
                    );
                }
                Err(GitError::LineNotFound) => {}
                Err(err) => log::error!("blame pinpoint failed for {}: {err}", bookmark.file),
            }

            // Strategy 2: project the pegged line through the hunks and
            // radiate within the projected range.
            match self.compute_current_line_range(file, peg, content) {
                Ok(range) => {
                    if let Some((line, col)) = search_range(&lines, &bookmark.text, range) {
                        return Ok(self.locate(bookmark, line, col));
                    }
                }
                Err(err) => {
                    log::error!("diff projection failed for {}: {err}", bookmark.file);
                }
            }
        }

        // Strategy 3: windowed text search around the recorded line.
        if let Some((line, col)) = spiral_search(&lines, &bookmark.text, bookmark.line) {
            return Ok(self.locate(bookmark, line, col));
        }

        Err(RelocatorError::MarkNotFound)
    }

    fn locate(&self, bookmark: &Bookmark, line: u32, col: u32) -> Location {
        Location {
            file: PathBuf::from(&bookmark.file),
            line,
            col,
        }
    }

    /// Compute a peg for the line currently at `current_line`.
    ///
    /// Blame gives the exact answer when it can; otherwise the line is
    /// projected backwards through the hunks between `commit` (or `HEAD`)
    /// and the current content. Degrades to `{line: current_line}` when the
    /// repository can't be consulted at all.
    pub fn compute_line_peg(
        &self,
        file: &Path,
        current_line: u32,
        commit: Option<&str>,
        live_content: Option<&str>,
    ) -> ComputedPeg {
        match self
            .git
            .line_introduction(file, current_line, commit, live_content)
        {
            Ok(peg) => {
                return ComputedPeg {
                    line: peg.line,
                    commit: Some(peg.commit),
                };
            }
            Err(err) => log::debug!("line introduction unavailable for {file:?}: {err}"),
        }

        match self.project_peg(file, current_line, commit, live_content) {
            Ok(peg) => peg,
            Err(err) => {
                log::debug!("peg projection unavailable for {file:?}: {err}");
                ComputedPeg {
                    line: current_line,
                    commit: None,
                }
            }
        }
    }

    fn project_peg(
        &self,
        file: &Path,
        current_line: u32,
        commit: Option<&str>,
        live_content: Option<&str>,
    ) -> Result<ComputedPeg, GitError> {
        let resolved = match commit {
            Some(commit) => commit.to_string(),
            None => self
                .git
                .rev_parse("HEAD")?
                .ok_or(GitError::NoCommitFound)?,
        };
        let current = match live_content {
            Some(text) => text.to_string(),
            None => std::fs::read_to_string(file)
                .map_err(|err| GitError::write_failed("read working copy", err))?,
        };
        let base = self
            .git
            .get_blob_content(&file.to_string_lossy(), &resolved)?;
        let hunks = self
            .diff
            .get_hunks(&Content::Immediate(base), &Content::Immediate(current))
            .map_err(|err| GitError::write_failed("diff", err))?;

        let (line, uses_commit) = project_line_to_base(&hunks, current_line);
        Ok(ComputedPeg {
            line,
            commit: uses_commit.then_some(resolved),
        })
    }

    /// Project a pegged line forward into the current content.
    pub fn compute_current_line_range(
        &self,
        file: &Path,
        peg: &Peg,
        content: &str,
    ) -> Result<LineRange, GitError> {
        let base = self
            .git
            .get_blob_content(&file.to_string_lossy(), &peg.commit)?;
        let hunks = self
            .diff
            .get_hunks(
                &Content::Immediate(base),
                &Content::Immediate(content.to_string()),
            )
            .map_err(|err| GitError::write_failed("diff", err))?;
        Ok(project_line_to_current(&hunks, peg.line))
    }
}

/// 1-based row lookup; the column of the mark within it, 1-based.
fn find_in_row(lines: &[&str], mark: &str, row: u32) -> Option<u32> {
    if row == 0 {
        return None;
    }
    let text = lines.get(row as usize - 1)?;
    text.find(mark).map(|idx| idx as u32 + 1)
}

/// Try `origin`, then ±1…±[`UNTRACKED_WINDOW_SIZE`], positive offset first.
fn spiral_search(lines: &[&str], mark: &str, origin: u32) -> Option<(u32, u32)> {
    if let Some(col) = find_in_row(lines, mark, origin) {
        return Some((origin, col));
    }
    for delta in 1..=UNTRACKED_WINDOW_SIZE {
        let above = origin + delta;
        if let Some(col) = find_in_row(lines, mark, above) {
            return Some((above, col));
        }
        if let Some(below) = origin.checked_sub(delta)
            && below >= 1
            && let Some(col) = find_in_row(lines, mark, below)
        {
            return Some((below, col));
        }
    }
    None
}

/// Check `prime`, then radiate outwards staying inside `[start, end)`;
/// lower candidate first at each step.
fn search_range(lines: &[&str], mark: &str, range: LineRange) -> Option<(u32, u32)> {
    if let Some(col) = find_in_row(lines, mark, range.prime) {
        return Some((range.prime, col));
    }
    let reach = (range.prime - range.start).max(range.end - range.prime);
    for delta in 1..=reach {
        if let Some(lower) = range.prime.checked_sub(delta)
            && lower >= range.start
            && let Some(col) = find_in_row(lines, mark, lower)
        {
            return Some((lower, col));
        }
        let upper = range.prime + delta;
        if upper < range.end
            && let Some(col) = find_in_row(lines, mark, upper)
        {
            return Some((upper, col));
        }
    }
    None
}

/// Map a current-content line back to the base side of the hunks.
///
/// Returns the base line and whether the peg should carry the base commit;
/// a line sitting *before* the next change is unchanged content, so there is
/// no commit to pin.
fn project_line_to_base(hunks: &[Change], current_line: u32) -> (u32, bool) {
    let mut offset: i64 = 0;
    for hunk in hunks {
        if current_line < hunk.current_start {
            return (apply_offset(current_line, -offset), false);
        }
        if current_line < hunk.current_end {
            let scaled = (current_line - hunk.current_start) as u64
                * (hunk.base_end - hunk.base_start) as u64
                / (hunk.current_end - hunk.current_start) as u64;
            return (hunk.base_start + scaled as u32, true);
        }
        offset = hunk.current_end as i64 - hunk.base_end as i64;
    }
    (apply_offset(current_line, -offset), true)
}

/// Map a base line into the current content, as a range with a prime guess.
fn project_line_to_current(hunks: &[Change], base_line: u32) -> LineRange {
    let mut offset: i64 = 0;
    for hunk in hunks {
        if base_line < hunk.base_start {
            break;
        }
        if base_line < hunk.base_end {
            let scaled = (base_line - hunk.base_start) as u64
                * (hunk.current_end - hunk.current_start) as u64
                / (hunk.base_end - hunk.base_start) as u64;
            return LineRange {
                start: hunk.current_start,
                prime: hunk.current_start + scaled as u32,
                end: hunk.current_end,
            };
        }
        offset = hunk.current_end as i64 - hunk.base_end as i64;
    }
    let start = apply_offset(base_line, offset);
    LineRange {
        start,
        prime: start,
        end: start + 1,
    }
}

fn apply_offset(line: u32, offset: i64) -> u32 {
    (line as i64 + offset).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn find_in_row_is_one_based() {
        let content = lines("alpha\nbeta gamma\n");
        assert_eq!(find_in_row(&content, "alpha", 1), Some(1));
        assert_eq!(find_in_row(&content, "gamma", 2), Some(6));
        assert_eq!(find_in_row(&content, "alpha", 2), None);
        assert_eq!(find_in_row(&content, "alpha", 0), None);
        assert_eq!(find_in_row(&content, "alpha", 99), None);
    }

    #[test]
    fn spiral_prefers_origin_then_positive_offset() {
        // The mark appears both one above and one below the origin; the
        // positive offset is checked first.
        let content = lines("mark\nother\nmark\n");
        assert_eq!(spiral_search(&content, "mark", 2), Some((3, 1)));
        assert_eq!(spiral_search(&content, "mark", 1), Some((1, 1)));
    }

    #[test]
    fn spiral_respects_window_size() {
        let mut text = String::new();
        for _ in 0..30 {
            text.push_str("filler\n");
        }
        text.push_str("needle\n"); // line 31
        let content = lines(&text);
        assert_eq!(spiral_search(&content, "needle", 16), Some((31, 1)));
        assert_eq!(spiral_search(&content, "needle", 15), None);
    }

    #[test]
    fn range_search_checks_prime_then_radiates_low_first() {
        let content = lines("mark\nx\nmark\nx\nmark\n");
        let range = LineRange {
            start: 1,
            prime: 4,
            end: 6,
        };
        // prime (4) misses; delta 1 checks 3 (low side) before 5.
        assert_eq!(search_range(&content, "mark", range), Some((3, 1)));
    }

    #[test]
    fn range_search_stays_inside_bounds() {
        let content = lines("mark\nx\nx\nx\nx\n");
        let range = LineRange {
            start: 2,
            prime: 3,
            end: 5,
        };
        // line 1 holds the mark but sits outside [2, 5).
        assert_eq!(search_range(&content, "mark", range), None);
    }

    fn hunk(base_start: u32, base_end: u32, current_start: u32, current_end: u32) -> Change {
        Change {
            base_start,
            base_end,
            current_start,
            current_end,
        }
    }

    #[rstest]
    #[case::before_all_hunks(2, (2, false))]
    #[case::inside_scales(8, (6, true))]
    #[case::after_shifts_back(20, (17, true))]
    fn current_line_projects_to_base(#[case] current: u32, #[case] expected: (u32, bool)) {
        // Base [5,8) became current [5,11): three lines grew to six, net +3.
        let hunks = [hunk(5, 8, 5, 11)];
        assert_eq!(project_line_to_base(&hunks, current), expected);
    }

    #[test]
    fn base_projection_accumulates_offsets_across_hunks() {
        // First hunk inserts two lines, second deletes one: net +1 after both.
        let hunks = [hunk(3, 3, 3, 5), hunk(10, 11, 12, 12)];
        assert_eq!(project_line_to_base(&hunks, 20), (19, true));
        // Between the hunks only the first offset applies.
        assert_eq!(project_line_to_base(&hunks, 8), (6, false));
    }

    #[rstest]
    #[case::before_hunk(1, LineRange { start: 1, prime: 1, end: 2 })]
    #[case::inside_start(5, LineRange { start: 5, prime: 5, end: 11 })]
    #[case::inside_scaled(6, LineRange { start: 5, prime: 7, end: 11 })]
    #[case::after_hunk(10, LineRange { start: 13, prime: 13, end: 14 })]
    fn base_line_projects_to_current_range(#[case] base: u32, #[case] expected: LineRange) {
        let hunks = [hunk(5, 8, 5, 11)];
        assert_eq!(project_line_to_current(&hunks, base), expected);
    }

    #[test]
    fn pure_insertion_hunk_only_shifts() {
        // Insertion at base position 3: lines at or past 3 shift by +2.
        let hunks = [hunk(3, 3, 3, 5)];
        assert_eq!(
            project_line_to_current(&hunks, 2),
            LineRange {
                start: 2,
                prime: 2,
                end: 3
            }
        );
        assert_eq!(
            project_line_to_current(&hunks, 3),
            LineRange {
                start: 5,
                prime: 5,
                end: 6
            }
        );
    }
}
