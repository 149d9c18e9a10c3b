//! Object plumbing: resolving committishes, reading and building trees,
//! writing blobs and commits, retrieving casefile content.

use std::ops::ControlFlow;
use std::sync::LazyLock;

use regex::Regex;

use crate::casefile::{Bookmark, Casefile, bookmarks_blob};
use crate::record_stream::Separator;
use crate::runner::RunnerError;

use super::{CasefileGroup, EMPTY_TREE_HASH, GitDriver, GitError, SHARED_CASEFILES_REF, TreeEntry};

/// `ls-tree -z` record: `<mode> SP <type> SP <hash> TAB <name>`. The name may
/// contain any byte except NUL, newlines included, hence `(?s)`.
static LS_TREE_RECORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^([0-7]+) (\S+) ([0-9a-fA-F]+)\t(.+)$").unwrap());

fn looks_like_object_name(text: &str) -> bool {
    matches!(text.len(), 40 | 64) && text.bytes().all(|b| b.is_ascii_hexdigit())
}

impl GitDriver {
    /// Resolve a committish to an object name; `None` when it doesn't exist.
    pub fn rev_parse(&self, committish: &str) -> Result<Option<String>, GitError> {
        let (code, stdout) = self.cmd("rev-parse").arg(committish).output()?;
        if code != 0 {
            return Ok(None);
        }
        Ok(Some(stdout.trim().to_string()))
    }

    /// The parents of a commit, via the `^@` revision suffix.
    pub(crate) fn rev_parse_parents(&self, committish: &str) -> Result<Vec<String>, GitError> {
        let (code, stdout) = self
            .cmd("rev-parse")
            .arg(format!("{committish}^@"))
            .output()?;
        if code != 0 {
            return Err(GitError::InvalidCommittish {
                committish: committish.to_string(),
            });
        }
        Ok(stdout.lines().map(str::to_string).collect())
    }

    /// Read the entries of one tree level (non-recursive).
    pub fn ls_tree(&self, treeish: &str) -> Result<Vec<TreeEntry>, GitError> {
        let mut entries = Vec::new();
        let invocation = self.cmd("ls-tree").flag("z").arg(treeish);
        let code = self.stream_records(invocation, Separator::Literal("\0".into()), |record| {
            if let Some(entry) = parse_tree_record(record) {
                entries.push(entry);
            }
            ControlFlow::Continue(())
        })?;
        if code != 0 {
            return Err(RunnerError::ChildProcessFailure {
                program: "git ls-tree".into(),
                exit_code: code,
            }
            .into());
        }
        Ok(entries)
    }

    /// List every shared casefile, grouped in traversal order.
    ///
    /// A non-zero exit (typically: the shared ref doesn't exist yet) yields
    /// an empty list.
    pub fn get_list_of_casefiles(&self) -> Result<Vec<CasefileGroup>, GitError> {
        let mut groups: Vec<CasefileGroup> = Vec::new();
        let invocation = self
            .cmd("ls-tree")
            .short_flags("rz")
            .flag("full-tree")
            .arg(SHARED_CASEFILES_REF);
        let code = self.stream_records(invocation, Separator::Literal("\0".into()), |record| {
            collect_casefile_record(&mut groups, record);
            ControlFlow::Continue(())
        })?;
        if code != 0 {
            return Ok(Vec::new());
        }
        Ok(groups)
    }

    /// Build a tree object from entries; returns its hash.
    ///
    /// Entry names must be single path levels. A result that is empty or the
    /// empty tree means the input degraded, which callers never want.
    pub fn mktree(&self, entries: &[TreeEntry]) -> Result<String, GitError> {
        let bad_entries: Vec<String> = entries
            .iter()
            .filter(|entry| entry.name.contains('/'))
            .map(|entry| entry.name.clone())
            .collect();
        if !bad_entries.is_empty() {
            return Err(GitError::InvalidTreeEntry { bad_entries });
        }

        let mut stdin = Vec::new();
        for entry in entries {
            stdin.extend_from_slice(
                format!("{} {} {}\t{}\0", entry.mode, entry.kind, entry.hash, entry.name)
                    .as_bytes(),
            );
        }
        let output = self
            .cmd("mktree")
            .flag("z")
            .feed_stdin(stdin)
            .run()
            .map_err(|err| GitError::write_failed("mktree", err))?;
        let hash = output.trim().to_string();
        if hash.is_empty() || hash == EMPTY_TREE_HASH {
            return Err(GitError::InvalidTreeResult { output: hash });
        }
        Ok(hash)
    }

    /// Write content to the object store; returns the blob hash.
    pub fn hash_object_write(&self, content: &str) -> Result<String, GitError> {
        let output = self
            .cmd("hash-object")
            .flag("w")
            .flag("stdin")
            .feed_stdin(content.as_bytes().to_vec())
            .run()
            .map_err(|err| GitError::write_failed("hash-object", err))?;
        Ok(output.trim().to_string())
    }

    /// The blob hash a bookmark forest stores under, writing the blob.
    ///
    /// Content-addressed: equal bookmark sets produce equal hashes, which is
    /// what makes sharing idempotent.
    pub fn get_hash_of_casefile(&self, bookmarks: &[Bookmark]) -> Result<String, GitError> {
        self.hash_object_write(&bookmarks_blob(bookmarks))
    }

    /// Create a commit for a casefiles tree; returns the commit hash.
    pub(crate) fn commit_casefiles_tree(
        &self,
        tree: &str,
        parents: &[String],
        message: &str,
    ) -> Result<String, GitError> {
        let output = self
            .cmd("commit-tree")
            .opt("m", message)
            .opt_values("p", parents.iter().cloned())
            .arg(tree)
            .run()
            .map_err(|err| GitError::write_failed("commit-tree", err))?;
        let commit = output.trim().to_string();
        if !looks_like_object_name(&commit) {
            return Err(GitError::InvalidCommit { output: commit });
        }
        Ok(commit)
    }

    /// Read a blob's content at `<commit>:<path>`.
    pub fn get_blob_content(&self, path: &str, commit: &str) -> Result<String, GitError> {
        Ok(self
            .cmd("cat-file")
            .arg("blob")
            .arg(format!("{commit}:{path}"))
            .run()?)
    }

    /// Load a casefile from the shared ref, or, with `before_commit`, the
    /// version that existed just before that commit deleted it.
    pub fn get_casefile(
        &self,
        path: &str,
        before_commit: Option<&str>,
    ) -> Result<Casefile, GitError> {
        let source: String = match before_commit {
            None => SHARED_CASEFILES_REF.into(),
            Some(committish) => self
                .find_latest_commit_parent_with_path(path, committish)?
                .ok_or(GitError::NoCommitFound)?,
        };
        let blob = self.get_blob_content(path, &source)?;
        Casefile::from_blob(path, &blob).map_err(|source| GitError::InvalidBlob {
            path: path.to_string(),
            source,
        })
    }
}

fn parse_tree_record(record: &str) -> Option<TreeEntry> {
    if record.is_empty() {
        return None;
    }
    let captures = LS_TREE_RECORD.captures(record)?;
    Some(TreeEntry {
        mode: captures[1].to_string(),
        kind: captures[2].to_string(),
        hash: captures[3].to_string(),
        name: captures[4].to_string(),
    })
}

/// Fold one recursive `ls-tree` record into the group list. Casefiles are
/// blobs exactly one directory deep; anything else in the tree is ignored.
fn collect_casefile_record(groups: &mut Vec<CasefileGroup>, record: &str) {
    let Some(entry) = parse_tree_record(record) else {
        return;
    };
    if entry.mode != "100644" || entry.kind != "blob" {
        return;
    }
    let Some((group_name, instance)) = entry.name.rsplit_once('/') else {
        return;
    };
    match groups.last_mut() {
        Some(group) if group.name == group_name => group.instances.push(instance.to_string()),
        _ => groups.push(CasefileGroup {
            name: group_name.to_string(),
            instances: vec![instance.to_string()],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn tree_record_parses() {
        let entry =
            parse_tree_record("100644 blob 8177f7c9c7e95cbee03e9f2e4f0723c4e5a89be2\tnotes.json")
                .unwrap();
        assert_eq!(entry.mode, "100644");
        assert_eq!(entry.kind, "blob");
        assert_eq!(entry.hash, "8177f7c9c7e95cbee03e9f2e4f0723c4e5a89be2");
        assert_eq!(entry.name, "notes.json");
    }

    #[rstest]
    #[case::empty("")]
    #[case::no_tab("100644 blob abc123 name")]
    #[case::truncated("100644 blob")]
    fn malformed_tree_records_are_skipped(#[case] record: &str) {
        assert!(parse_tree_record(record).is_none());
    }

    #[test]
    fn tree_record_name_may_contain_newline() {
        let entry = parse_tree_record(
            "100644 blob 8177f7c9c7e95cbee03e9f2e4f0723c4e5a89be2\todd\nname",
        )
        .unwrap();
        assert_eq!(entry.name, "odd\nname");
    }

    fn groups_from<S: AsRef<str>>(records: &[S]) -> Vec<CasefileGroup> {
        let mut groups = Vec::new();
        for record in records {
            collect_casefile_record(&mut groups, record.as_ref());
        }
        groups
    }

    #[test]
    fn adjacent_records_group_together() {
        let h1 = "1".repeat(40);
        let h2 = "2".repeat(40);
        let groups = groups_from(&[
            &format!("100644 blob {h1}\ta casefile/22218950-77d5-4a04"),
            &format!("100644 blob {h2}\ta casefile/ed421d07-16b1-4c38"),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "a casefile");
        assert_eq!(
            groups[0].instances,
            ["22218950-77d5-4a04", "ed421d07-16b1-4c38"]
        );
    }

    #[test]
    fn non_adjacent_duplicates_stay_separate() {
        let hash = "3".repeat(40);
        let groups = groups_from(&[
            &format!("100644 blob {hash}\talpha/one"),
            &format!("100644 blob {hash}\tbeta/two"),
            &format!("100644 blob {hash}\talpha/three"),
        ]);
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta", "alpha"]);
    }

    #[test]
    fn non_blob_and_top_level_records_are_ignored() {
        let hash = "4".repeat(40);
        let groups = groups_from(&[
            &format!("040000 tree {hash}\talpha"),
            &format!("100644 blob {hash}\ttoplevel-blob"),
            &format!("100755 blob {hash}\talpha/executable"),
            &format!("100644 blob {hash}\talpha/kept"),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].instances, ["kept"]);
    }

    #[test]
    fn group_with_slash_splits_rightmost() {
        let hash = "5".repeat(40);
        let groups = groups_from(&[&format!("100644 blob {hash}\tteam/alpha/uuid-1")]);
        assert_eq!(groups[0].name, "team/alpha");
        assert_eq!(groups[0].instances, ["uuid-1"]);
    }

    #[rstest]
    #[case::sha1("4b825dc642cb6eb9a060e54bf8d69288fbee4904", true)]
    #[case::sha256(
        "6ef19b41225c5369f1c104d45d8d85efa9b057b53b14b4b9b939dd74decc5321",
        true
    )]
    #[case::short("4b825dc6", false)]
    #[case::not_hex("zz825dc642cb6eb9a060e54bf8d69288fbee4904", false)]
    fn object_name_shapes(#[case] text: &str, #[case] ok: bool) {
        assert_eq!(looks_like_object_name(text), ok);
    }
}
