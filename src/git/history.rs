//! History over the shared-casefiles ref: author listings, the
//! deleted-casefile log, and pre-deletion parent resolution.

use std::ops::ControlFlow;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

use crate::casefile::DeletedCasefile;
use crate::record_stream::Separator;

use super::{GitDriver, GitError, SHARED_CASEFILES_REF, recover_absent};

/// Commit-info line of the deleted-casefile log: `- <sha> <iso-date>`, where
/// the date is `%ci`'s three space-separated words.
static COMMIT_INFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- (\S+) (\S+ \S+ \S+)$").unwrap());

fn parse_ci_date(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z").ok()
}

fn epoch() -> DateTime<FixedOffset> {
    DateTime::from_timestamp(0, 0)
        .expect("epoch is representable")
        .fixed_offset()
}

impl GitDriver {
    /// Authors who have touched a casefile, first-seen dedup, then sorted.
    pub fn get_casefile_authors(&self, path: &str) -> Result<Vec<String>, GitError> {
        let result = self
            .cmd("log")
            .opt("pretty", "format:%aN")
            .arg(SHARED_CASEFILES_REF)
            .args(["--", path])
            .run()
            .map_err(GitError::from)
            .map(|stdout| dedup_and_sort(stdout.lines()));
        recover_absent(result, Vec::new)
    }

    /// Casefiles deleted from the shared ref, newest-first per the log.
    ///
    /// `partial` narrows by substring of the group name. A non-zero exit
    /// (no ref, no history) yields an empty list.
    pub fn get_deleted_casefile_refs(
        &self,
        partial: Option<&str>,
    ) -> Result<Vec<DeletedCasefile>, GitError> {
        let mut invocation = self
            .cmd("log")
            .flag("z")
            .opt("diff-filter", "D")
            .flag("name-status")
            .opt("pretty", "format:- %H %ci")
            .arg(SHARED_CASEFILES_REF);
        if let Some(partial) = partial {
            invocation = invocation.args(["--".to_string(), format!("*{partial}*/*")]);
        }

        let mut parser = DeletedLogParser::default();
        let mut parse_error = None;
        let code = self.stream_records(invocation, Separator::Literal("\0".into()), |record| {
            match parser.feed(record) {
                Ok(()) => ControlFlow::Continue(()),
                Err(err) => {
                    parse_error = Some(err);
                    ControlFlow::Break(())
                }
            }
        })?;
        if let Some(err) = parse_error {
            return Err(err);
        }
        if code != 0 {
            return Ok(Vec::new());
        }
        Ok(parser.into_entries())
    }

    /// When the casefile at `path` last changed, as of `commit`.
    pub(crate) fn get_date_of_last_change(
        &self,
        path: &str,
        commit: &str,
    ) -> Result<DateTime<FixedOffset>, GitError> {
        let stdout = self
            .cmd("log")
            .opt("pretty", "%ci")
            .opt("n", "1")
            .arg(commit)
            .args(["--", path])
            .run()?;
        let line = stdout.trim();
        if line.is_empty() {
            return Err(GitError::NoCommitFound);
        }
        parse_ci_date(line).ok_or_else(|| GitError::InvalidGitLogOutput {
            record: line.to_string(),
        })
    }

    /// Among the parents of `committish`, the one whose copy of `path`
    /// changed most recently: the version to read when `committish` deleted
    /// it. Parents that don't know the path are skipped; the earlier parent
    /// wins a date tie.
    pub fn find_latest_commit_parent_with_path(
        &self,
        path: &str,
        committish: &str,
    ) -> Result<Option<String>, GitError> {
        let parents = self.rev_parse_parents(committish)?;
        let mut best: Option<String> = None;
        let mut best_date = epoch();
        for parent in parents {
            let date = match self.get_date_of_last_change(path, &parent) {
                Ok(date) => date,
                // Parent doesn't know the path; not a candidate.
                Err(err) if err.is_expected_absence() => continue,
                Err(err) => return Err(err),
            };
            if date > best_date {
                best_date = date;
                best = Some(parent);
            }
        }
        Ok(best)
    }
}

fn dedup_and_sort<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for line in lines {
        if !seen.iter().any(|known| known == line) {
            seen.push(line.to_string());
        }
    }
    seen.sort();
    seen
}

/// Two-state machine over the NUL records of
/// `log -z --diff-filter=D --name-status --pretty=format:"- %H %ci"`.
///
/// Records alternate between an action record (either a commit-info line
/// with the `D` status glued on, or a bare `D` for further deletions in the
/// same commit) and the deleted path itself.
#[derive(Debug, Default)]
struct DeletedLogParser {
    expecting_path: bool,
    current: Option<(String, DateTime<FixedOffset>)>,
    entries: Vec<DeletedCasefile>,
}

impl DeletedLogParser {
    fn feed(&mut self, record: &str) -> Result<(), GitError> {
        if !self.expecting_path {
            if record.is_empty() {
                return Ok(());
            }
            if record.starts_with('-') {
                let header = record.split('\n').next().unwrap_or(record);
                let captures =
                    COMMIT_INFO
                        .captures(header)
                        .ok_or_else(|| GitError::InvalidGitLogOutput {
                            record: header.to_string(),
                        })?;
                let committed =
                    parse_ci_date(&captures[2]).ok_or_else(|| GitError::InvalidGitLogOutput {
                        record: header.to_string(),
                    })?;
                self.current = Some((captures[1].to_string(), committed));
            }
            // Otherwise the record is the `D` status of a further deletion
            // in the current commit; keep the commit info as-is.
            self.expecting_path = true;
            return Ok(());
        }

        let (commit, committed) =
            self.current
                .clone()
                .ok_or_else(|| GitError::InvalidGitLogOutput {
                    record: record.to_string(),
                })?;
        self.entries.push(DeletedCasefile {
            commit,
            committed,
            path: record.to_string(),
        });
        self.expecting_path = false;
        Ok(())
    }

    fn into_entries(self) -> Vec<DeletedCasefile> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn feed_all(records: &[&str]) -> Result<Vec<DeletedCasefile>, GitError> {
        let mut parser = DeletedLogParser::default();
        for record in records {
            parser.feed(record)?;
        }
        Ok(parser.into_entries())
    }

    #[test]
    fn single_deletion_per_commit() {
        let entries = feed_all(&[
            "- 1111111111111111111111111111111111111111 2024-03-01 10:00:00 +0000\nD",
            "group/instance-1",
        ])
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].commit, "1".repeat(40));
        assert_eq!(entries[0].path, "group/instance-1");
    }

    #[test]
    fn alternating_stream_with_multi_file_commit() {
        // The literal shape of `log -z` output: commit one deleted p1,
        // commit two deleted p2 and p3.
        let entries = feed_all(&[
            "- C1 2024-03-01 10:00:00 +0000\nD",
            "p1",
            "",
            "- C2 2024-03-02 11:30:00 +0100\nD",
            "p2",
            "D",
            "p3",
            "",
        ])
        .unwrap();
        let summary: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.commit.as_str(), e.path.as_str()))
            .collect();
        assert_eq!(summary, [("C1", "p1"), ("C2", "p2"), ("C2", "p3")]);
        assert_eq!(
            entries[1].committed,
            DateTime::parse_from_rfc3339("2024-03-02T11:30:00+01:00").unwrap()
        );
    }

    #[rstest]
    #[case::missing_date("- C1\nD")]
    #[case::garbled_date("- C1 not a date\nD")]
    fn malformed_commit_info_is_rejected(#[case] record: &str) {
        let err = feed_all(&[record]).unwrap_err();
        assert!(matches!(err, GitError::InvalidGitLogOutput { .. }));
    }

    #[test]
    fn path_without_commit_info_is_rejected() {
        // A bare `D` action before any commit-info record.
        let err = feed_all(&["D", "orphan/path"]).unwrap_err();
        assert!(matches!(err, GitError::InvalidGitLogOutput { .. }));
    }

    #[test]
    fn dedup_preserves_first_seen_then_sorts() {
        let authors = dedup_and_sort(["Zoe", "Ada", "Zoe", "Mel", "Ada"].into_iter());
        assert_eq!(authors, ["Ada", "Mel", "Zoe"]);
    }

    #[rstest]
    #[case::utc("2024-03-01 10:00:00 +0000", true)]
    #[case::offset("2024-03-02 11:30:00 +0130", true)]
    #[case::negative_offset("2024-03-02 11:30:00 -0800", true)]
    #[case::iso_t_form("2024-03-01T10:00:00+0000", false)]
    fn ci_date_parsing(#[case] text: &str, #[case] ok: bool) {
        assert_eq!(parse_ci_date(text).is_some(), ok);
    }
}
