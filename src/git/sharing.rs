//! The share and delete pipelines over the shared-casefiles ref, plus the
//! `push` / `update-ref` plumbing they end in.
//!
//! Both pipelines build replacement tree objects from deltas against the
//! current tip, commit them, push to the remote, and only then move the
//! local ref. The remote is the source of truth; a failed push leaves the
//! local ref untouched.

use std::collections::HashSet;

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::casefile::{Bookmark, CasefilePath};

use super::{
    EMPTY_TREE_HASH, GitDriver, GitError, PushSource, PushSpec, SHARED_CASEFILES_REF, TreeEntry,
    recover_absent,
};

/// Outcome of [`GitDriver::share_casefile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareResult {
    /// A new tip was pushed and the local ref updated.
    Shared { commit: String },
    /// The identical blob was already shared; nothing was pushed.
    NoChanges { commit: String },
}

impl ShareResult {
    pub fn message(&self) -> &'static str {
        match self {
            ShareResult::Shared { .. } => "casefile shared",
            ShareResult::NoChanges { .. } => "no changes to share",
        }
    }

    pub fn commit(&self) -> &str {
        match self {
            ShareResult::Shared { commit } | ShareResult::NoChanges { commit } => commit,
        }
    }
}

/// Outcome of [`GitDriver::delete_casefile_paths`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteResult {
    /// None of the requested paths were present; nothing was pushed.
    NoChanges,
    /// A new tip without the deleted paths was pushed.
    Updated { commit: String },
    /// The last casefile went away; the ref was deleted on both sides.
    RefDeleted,
}

/// What a group's subtree should become after a deletion pass.
#[derive(Debug, PartialEq, Eq)]
enum GroupPlan {
    Rebuild(Vec<TreeEntry>),
    Remove,
}

impl GitDriver {
    /// Share a bookmark set at `path`, creating or replacing the casefile
    /// blob in the shared tree.
    ///
    /// Idempotent: sharing an identical bookmark set again is a no-op that
    /// neither pushes nor moves the local ref.
    pub fn share_casefile(
        &self,
        remote: &str,
        path: &CasefilePath,
        bookmarks: &[Bookmark],
    ) -> Result<ShareResult, GitError> {
        let parents: Vec<String> = self.rev_parse(SHARED_CASEFILES_REF)?.into_iter().collect();
        let base_tree = parents
            .first()
            .cloned()
            .unwrap_or_else(|| EMPTY_TREE_HASH.to_string());

        let blob_hash = self.get_hash_of_casefile(bookmarks)?;

        let mut group_entries = recover_absent(
            self.ls_tree(&format!("{base_tree}:{}", path.group())),
            Vec::new,
        )?;
        match group_entries
            .iter()
            .position(|entry| entry.name == path.instance())
        {
            None => group_entries.push(TreeEntry::blob(blob_hash, path.instance())),
            Some(at) if group_entries[at].hash == blob_hash => {
                return Ok(ShareResult::NoChanges { commit: base_tree });
            }
            Some(at) => group_entries[at].hash = blob_hash,
        }
        let group_tree = self.mktree(&group_entries)?;

        // Unlike the group subtree, the root read has no expected-absence
        // case: base_tree is a resolved commit or the empty tree, both of
        // which ls-tree cleanly. Any failure aborts before we build a root
        // that would silently drop the other groups.
        let mut root_entries = self.ls_tree(&base_tree)?;
        root_entries.retain(|entry| entry.name != path.group());
        root_entries.push(TreeEntry::subtree(group_tree, path.group()));
        let root_tree = self.mktree(&root_entries)?;

        let commit = self.commit_casefiles_tree(&root_tree, &parents, "Share casefile")?;
        self.push(
            remote,
            &[PushSpec {
                source: PushSource::Commit(commit.clone()),
                dest: SHARED_CASEFILES_REF.into(),
                force: false,
            }],
        )?;
        self.update_ref(SHARED_CASEFILES_REF, Some(&commit))?;
        Ok(ShareResult::Shared { commit })
    }

    /// Remove the given casefile paths from the shared tree.
    ///
    /// Monotone: paths that are already absent contribute nothing, so
    /// repeating a deletion is a no-op. Removing the last casefile deletes
    /// the ref itself, remotely and locally.
    pub fn delete_casefile_paths<I, S>(&self, remote: &str, paths: I) -> Result<DeleteResult, GitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut by_group: IndexMap<String, HashSet<String>> = IndexMap::new();
        for path in paths {
            let path = path.into();
            if let Some(parsed) = CasefilePath::parse(&path) {
                by_group
                    .entry(parsed.group().to_string())
                    .or_default()
                    .insert(path);
            }
        }

        let Some(tip) = self.rev_parse(SHARED_CASEFILES_REF)? else {
            return Ok(DeleteResult::NoChanges);
        };

        // Per-group subtree reads address disjoint subtrees, so they can fan
        // out; everything after this point is a sequential pipeline.
        let groups: Vec<(&String, &HashSet<String>)> = by_group.iter().collect();
        let plans: Vec<(String, Option<GroupPlan>)> = groups
            .into_par_iter()
            .map(|(group, doomed)| {
                let entries = match self.ls_tree(&format!("{tip}:{group}")) {
                    Ok(entries) => entries,
                    // Group not in the tree; nothing to delete there.
                    Err(err) if err.is_expected_absence() => return Ok((group.clone(), None)),
                    Err(err) => return Err(err),
                };
                Ok((group.clone(), plan_group_deletion(group, entries, doomed)))
            })
            .collect::<Result<_, GitError>>()?;

        let plans: IndexMap<String, GroupPlan> = plans
            .into_iter()
            .filter_map(|(group, plan)| plan.map(|p| (group, p)))
            .collect();
        if plans.is_empty() {
            return Ok(DeleteResult::NoChanges);
        }

        // The tip just resolved, so a failing root read is never "the tree
        // is empty". Treating it that way would send us down the ref-deletion
        // branch below on a transient failure.
        let mut root_entries = Vec::new();
        for entry in self.ls_tree(&tip)? {
            match plans.get(&entry.name) {
                None => root_entries.push(entry),
                Some(GroupPlan::Remove) => {}
                Some(GroupPlan::Rebuild(entries)) => {
                    let group_tree = self.mktree(entries)?;
                    root_entries.push(TreeEntry::subtree(group_tree, entry.name));
                }
            }
        }

        if root_entries.is_empty() {
            self.push(
                remote,
                &[PushSpec {
                    source: PushSource::Delete,
                    dest: SHARED_CASEFILES_REF.into(),
                    force: false,
                }],
            )?;
            self.update_ref(SHARED_CASEFILES_REF, None)?;
            return Ok(DeleteResult::RefDeleted);
        }

        let root_tree = self.mktree(&root_entries)?;
        let commit =
            self.commit_casefiles_tree(&root_tree, std::slice::from_ref(&tip), "Delete casefiles")?;
        self.push(
            remote,
            &[PushSpec {
                source: PushSource::Commit(commit.clone()),
                dest: SHARED_CASEFILES_REF.into(),
                force: false,
            }],
        )?;
        self.update_ref(SHARED_CASEFILES_REF, Some(&commit))?;
        Ok(DeleteResult::Updated { commit })
    }

    /// Push refspecs to a remote.
    pub fn push(&self, remote: &str, specs: &[PushSpec]) -> Result<(), GitError> {
        let mut invocation = self.cmd("push").arg(remote);
        for spec in specs {
            invocation = invocation.arg(spec.to_refspec());
        }
        invocation
            .run()
            .map_err(|err| GitError::write_failed("push", err))?;
        Ok(())
    }

    /// Point a local ref at a commit, or delete it.
    pub fn update_ref(&self, refname: &str, commit: Option<&str>) -> Result<(), GitError> {
        let invocation = match commit {
            Some(commit) => self.cmd("update-ref").arg(refname).arg(commit),
            None => self.cmd("update-ref").flag("d").arg(refname),
        };
        invocation
            .run()
            .map_err(|err| GitError::write_failed("update-ref", err))?;
        Ok(())
    }
}

/// Decide what happens to one group's entries given the full paths to
/// delete. `None` means the group is untouched.
fn plan_group_deletion(
    group: &str,
    entries: Vec<TreeEntry>,
    doomed: &HashSet<String>,
) -> Option<GroupPlan> {
    let total = entries.len();
    let kept: Vec<TreeEntry> = entries
        .into_iter()
        .filter(|entry| !doomed.contains(&format!("{group}/{}", entry.name)))
        .collect();
    if kept.len() == total {
        return None;
    }
    if kept.is_empty() {
        return Some(GroupPlan::Remove);
    }
    Some(GroupPlan::Rebuild(kept))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> TreeEntry {
        TreeEntry::blob("0".repeat(40), name)
    }

    fn doomed(paths: &[&str]) -> HashSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn untouched_group_produces_no_plan() {
        let plan = plan_group_deletion(
            "g",
            vec![entry("one"), entry("two")],
            &doomed(&["other/one"]),
        );
        assert_eq!(plan, None);
    }

    #[test]
    fn partial_deletion_rebuilds_with_survivors() {
        let plan = plan_group_deletion(
            "g",
            vec![entry("one"), entry("two"), entry("three")],
            &doomed(&["g/two"]),
        );
        match plan {
            Some(GroupPlan::Rebuild(kept)) => {
                let names: Vec<_> = kept.iter().map(|e| e.name.as_str()).collect();
                assert_eq!(names, ["one", "three"]);
            }
            other => panic!("expected Rebuild, got {other:?}"),
        }
    }

    #[test]
    fn deleting_every_instance_removes_the_group() {
        let plan = plan_group_deletion(
            "g",
            vec![entry("one"), entry("two")],
            &doomed(&["g/one", "g/two"]),
        );
        assert_eq!(plan, Some(GroupPlan::Remove));
    }

    #[test]
    fn group_name_with_slash_matches_full_paths() {
        let plan = plan_group_deletion(
            "team/alpha",
            vec![entry("uuid-1")],
            &doomed(&["team/alpha/uuid-1"]),
        );
        assert_eq!(plan, Some(GroupPlan::Remove));
    }

    #[test]
    fn share_result_messages() {
        let shared = ShareResult::Shared {
            commit: "c1".into(),
        };
        let unchanged = ShareResult::NoChanges {
            commit: "c0".into(),
        };
        assert_eq!(shared.message(), "casefile shared");
        assert_eq!(unchanged.message(), "no changes to share");
        assert_eq!(shared.commit(), "c1");
        assert_eq!(unchanged.commit(), "c0");
    }
}
