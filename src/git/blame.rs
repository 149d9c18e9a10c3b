//! Blame-based line lookups: which commit introduced a line, and where a
//! pegged line sits in current content.
//!
//! Both operations run `git blame` from the bookmarked file's directory
//! against its basename, so they work no matter where the repository root
//! is relative to the driver's cwd.

use std::ops::ControlFlow;
use std::path::Path;

use regex::Regex;

use crate::casefile::Peg;
use crate::record_stream::Separator;

use super::{GitDriver, GitError};

/// An all-zeroes object name, blame's way of saying "not committed yet".
fn is_null_object_name(text: &str) -> bool {
    matches!(text.len(), 40 | 64) && text.bytes().all(|b| b == b'0')
}

/// First line of `blame --porcelain`: `<sha> <sourceLine> <resultLine> ...`.
fn parse_porcelain_head(stdout: &str) -> Option<(String, u32)> {
    let mut words = stdout.lines().next()?.split_whitespace();
    let sha = words.next()?.to_string();
    let source_line: u32 = words.next()?.parse().ok()?;
    Some((sha, source_line))
}

fn split_file(file: &Path) -> Result<(&Path, &std::ffi::OsStr), GitError> {
    let basename = file
        .file_name()
        .ok_or_else(|| GitError::Bug(format!("blame target {file:?} has no file name")))?;
    let dir = match file.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => Path::new("."),
    };
    Ok((dir, basename))
}

impl GitDriver {
    /// The peg for a line: the commit that introduced it and its line number
    /// there.
    ///
    /// Content precedence: an explicit `commit` blames that revision; absent
    /// that, `live_content` is blamed as the working copy via stdin; absent
    /// both, the on-disk file is blamed.
    pub fn line_introduction(
        &self,
        file: &Path,
        line: u32,
        commit: Option<&str>,
        live_content: Option<&str>,
    ) -> Result<Peg, GitError> {
        let (dir, basename) = split_file(file)?;
        let mut invocation = self
            .cmd("blame")
            .opt("L", format!("{line},{line}"))
            .flag("porcelain")
            .cwd(dir);
        let feed_live = commit.is_none() && live_content.is_some();
        if feed_live {
            invocation = invocation
                .opt("contents", "-")
                .feed_stdin(live_content.unwrap_or_default().as_bytes().to_vec());
        }
        if let Some(commit) = commit {
            invocation = invocation.arg(commit);
        }
        let stdout = invocation.arg("--").arg(basename).run()?;

        let Some((sha, source_line)) = parse_porcelain_head(&stdout) else {
            return Err(GitError::NoCommitFound);
        };
        if is_null_object_name(&sha) {
            return Err(GitError::NoCommitFound);
        }
        Ok(Peg {
            commit: sha,
            line: source_line,
        })
    }

    /// Where the pegged line sits in current content.
    ///
    /// Streams `blame --incremental` and resolves on the first record whose
    /// source range covers the pegged line; the stream is terminated early
    /// at that point.
    pub fn find_current_line_position(
        &self,
        file: &Path,
        peg: &Peg,
        content: Option<&str>,
    ) -> Result<u32, GitError> {
        let (dir, basename) = split_file(file)?;
        let mut invocation = self.cmd("blame").flag("incremental").cwd(dir);
        if let Some(content) = content {
            invocation = invocation
                .opt("contents", "-")
                .feed_stdin(content.as_bytes().to_vec());
        }
        let invocation = invocation.arg("--").arg(basename);

        let mapping = Regex::new(&format!(
            r"^{}\S* (\d+) (\d+) (\d+)$",
            regex::escape(&peg.commit)
        ))
        .map_err(|err| GitError::Bug(format!("blame mapping pattern: {err}")))?;

        let sought = peg.line;
        let mut found: Option<u32> = None;
        self.stream_records(invocation, Separator::Literal("\n".into()), |record| {
            match map_line(&mapping, record, sought) {
                Some(line) => {
                    found = Some(line);
                    ControlFlow::Break(())
                }
                None => ControlFlow::Continue(()),
            }
        })?;
        found.ok_or(GitError::LineNotFound)
    }
}

/// Apply one incremental-blame record to the sought line:
/// `<commit> <sourceLine> <resultLine> <span>` maps source lines
/// `[sourceLine, sourceLine + span)` onto result lines at the same offset.
fn map_line(mapping: &Regex, record: &str, sought: u32) -> Option<u32> {
    let captures = mapping.captures(record)?;
    let source_line: u32 = captures[1].parse().ok()?;
    let result_line: u32 = captures[2].parse().ok()?;
    let span: u32 = captures[3].parse().ok()?;
    if source_line <= sought && sought < source_line + span {
        Some(result_line + (sought - source_line))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zeros_sha1(&"0".repeat(40), true)]
    #[case::zeros_sha256(&"0".repeat(64), true)]
    #[case::real(&"4b825dc642cb6eb9a060e54bf8d69288fbee4904".to_string(), false)]
    #[case::short_zeros(&"000000".to_string(), false)]
    fn null_object_name_detection(#[case] sha: &String, #[case] is_null: bool) {
        assert_eq!(is_null_object_name(sha), is_null);
    }

    #[test]
    fn porcelain_head_parses() {
        let stdout = "8177f7c9c7e95cbee03e9f2e4f0723c4e5a89be2 5 7 1\nauthor A U Thor\n";
        let (sha, line) = parse_porcelain_head(stdout).unwrap();
        assert_eq!(sha, "8177f7c9c7e95cbee03e9f2e4f0723c4e5a89be2");
        assert_eq!(line, 5);
    }

    #[test]
    fn porcelain_head_rejects_garbage() {
        assert!(parse_porcelain_head("").is_none());
        assert!(parse_porcelain_head("just-a-sha-no-line").is_none());
    }

    fn commit_re(commit: &str) -> Regex {
        Regex::new(&format!(r"^{}\S* (\d+) (\d+) (\d+)$", regex::escape(commit))).unwrap()
    }

    #[rstest]
    #[case::first_of_span(5, Some(12))]
    #[case::inside_span(6, Some(13))]
    #[case::last_of_span(7, Some(14))]
    #[case::past_span(8, None)]
    #[case::before_span(4, None)]
    fn incremental_mapping_range(#[case] sought: u32, #[case] expected: Option<u32>) {
        let commit = "a".repeat(40);
        let record = format!("{commit} 5 12 3");
        assert_eq!(map_line(&commit_re(&commit), &record, sought), expected);
    }

    #[test]
    fn other_commits_records_are_ignored() {
        let ours = "a".repeat(40);
        let theirs = format!("{} 5 12 3", "b".repeat(40));
        assert_eq!(map_line(&commit_re(&ours), &theirs, 5), None);
    }

    #[test]
    fn non_mapping_records_are_ignored() {
        let commit = "a".repeat(40);
        let re = commit_re(&commit);
        assert_eq!(map_line(&re, "filename foo.txt", 5), None);
        assert_eq!(map_line(&re, &format!("author {commit}"), 5), None);
    }

    #[test]
    fn abbreviated_peg_commit_matches_full_sha() {
        let full = "a".repeat(40);
        let record = format!("{full} 5 12 3");
        assert_eq!(map_line(&commit_re(&full[..12]), &record, 5), Some(12));
    }

    #[rstest]
    #[case::plain("src/module/file.rs", "src/module", "file.rs")]
    #[case::bare_name("file.rs", ".", "file.rs")]
    fn file_splitting(#[case] input: &str, #[case] dir: &str, #[case] base: &str) {
        let (d, b) = split_file(Path::new(input)).unwrap();
        assert_eq!(d, Path::new(dir));
        assert_eq!(b, std::ffi::OsStr::new(base));
    }
}
