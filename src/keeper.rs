//! The façade: one [`CasefileKeeper`] wires the drivers together and hands
//! out lightweight handles for remotes, shared casefiles, and deleted
//! casefiles.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};

use crate::casefile::{Casefile, CasefilePath, is_full_object_name};
use crate::diff::DiffDriver;
use crate::git::{
    DeleteResult, GitDriver, GitDriverOptions, GitError, PushSource, PushSpec,
    REFERENCED_COMMITS_PREFIX, ShareResult,
};
use crate::relocator::BookmarkRelocator;

/// Construction options for [`CasefileKeeper`].
#[derive(Debug, Default)]
pub struct KeeperOptions {
    /// `git` executable; defaults to `git` on `PATH`.
    pub git_binary: Option<PathBuf>,
    /// `diff` executable; defaults to `diff` on `PATH`.
    pub diff_binary: Option<PathBuf>,
    /// Repository directory; defaults to the process cwd.
    pub cwd: Option<PathBuf>,
    /// Extra environment for every `git` invocation.
    pub env: Option<HashMap<String, String>>,
    pub timeout: Option<Duration>,
}

/// Owns the drivers and produces handles bound to them.
#[derive(Debug)]
pub struct CasefileKeeper {
    git: GitDriver,
    diff: DiffDriver,
}

impl Default for CasefileKeeper {
    fn default() -> Self {
        Self::new(KeeperOptions::default())
    }
}

impl CasefileKeeper {
    pub fn new(options: KeeperOptions) -> Self {
        let git = GitDriver::new(GitDriverOptions {
            binary: options.git_binary,
            cwd: options.cwd,
            env: options.env,
            timeout: options.timeout,
        });
        let diff = match options.diff_binary {
            Some(binary) => DiffDriver::new(binary),
            None => DiffDriver::default(),
        };
        Self { git, diff }
    }

    pub fn git(&self) -> &GitDriver {
        &self.git
    }

    pub fn diff(&self) -> &DiffDriver {
        &self.diff
    }

    pub fn relocator(&self) -> BookmarkRelocator<'_> {
        BookmarkRelocator::new(&self.git, &self.diff)
    }

    /// Handle for a remote by name; no validation happens until use.
    pub fn remote(&self, name: impl Into<String>) -> GitRemote<'_> {
        GitRemote {
            keeper: self,
            name: name.into(),
        }
    }

    /// Handles for every configured remote.
    pub fn remotes(&self) -> Result<Vec<GitRemote<'_>>, GitError> {
        Ok(self
            .git
            .get_list_of_remotes()?
            .into_iter()
            .map(|name| GitRemote { keeper: self, name })
            .collect())
    }

    /// The shared casefiles, grouped, as loadable handles.
    pub fn casefile_groups(&self) -> Result<Vec<CasefileGroup<'_>>, GitError> {
        Ok(self
            .git
            .get_list_of_casefiles()?
            .into_iter()
            .map(|group| {
                let instances = group
                    .instances
                    .into_iter()
                    .map(|instance| CasefileRef {
                        keeper: self,
                        group_name: group.name.clone(),
                        instance,
                    })
                    .collect();
                CasefileGroup {
                    name: group.name,
                    instances,
                }
            })
            .collect())
    }

    /// Casefiles deleted from the shared ref, as retrievable handles.
    pub fn deleted_casefiles(
        &self,
        partial: Option<&str>,
    ) -> Result<Vec<DeletedCasefileRef<'_>>, GitError> {
        Ok(self
            .git
            .get_deleted_casefile_refs(partial)?
            .into_iter()
            .map(|deleted| DeletedCasefileRef {
                keeper: self,
                deletion_commit: deleted.commit,
                committed: deleted.committed,
                path: deleted.path,
            })
            .collect())
    }
}

/// Whether a remote already has every commit a casefile's pegs reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitsKnown {
    AllKnown,
    Unknown(Vec<String>),
}

/// A remote, bound to the keeper that created it.
#[derive(Debug)]
pub struct GitRemote<'a> {
    keeper: &'a CasefileKeeper,
    pub name: String,
}

impl GitRemote<'_> {
    pub fn fetch(&self) -> Result<(), GitError> {
        self.keeper.git.fetch_from_remote(&self.name)
    }

    pub fn fetch_shared_casefiles(&self) -> Result<(), GitError> {
        self.keeper.git.fetch_shared_casefiles_from_remote(&self.name)
    }

    /// Which of the casefile's peg commits this remote doesn't have yet.
    ///
    /// Those need [`push_commit_refs`](Self::push_commit_refs) before
    /// sharing, or collaborators may find the pegs garbage-collected away.
    pub fn commits_unknown(&self, casefile: &Casefile) -> Result<CommitsKnown, GitError> {
        let commits = casefile.pegged_commits();
        if commits.is_empty() {
            return Ok(CommitsKnown::AllKnown);
        }
        let unknown = self
            .keeper
            .git
            .select_commits_unknown_to_remote(&self.name, &commits)?;
        if unknown.is_empty() {
            Ok(CommitsKnown::AllKnown)
        } else {
            Ok(CommitsKnown::Unknown(unknown))
        }
    }

    pub fn share(&self, casefile: &Casefile) -> Result<ShareResult, GitError> {
        let path = CasefilePath::parse(&casefile.path).ok_or_else(|| {
            GitError::Bug(format!(
                "casefile path {:?} is not of the form group/instance",
                casefile.path
            ))
        })?;
        let abbreviated: Vec<String> = casefile
            .flatten_bookmarks()
            .into_iter()
            .filter_map(|bookmark| bookmark.peg.as_ref())
            .filter(|peg| !peg.has_full_object_name())
            .map(|peg| peg.commit.clone())
            .collect();
        if !abbreviated.is_empty() {
            return Err(GitError::InvalidPeg {
                commits: abbreviated,
            });
        }
        self.keeper
            .git
            .share_casefile(&self.name, &path, &casefile.bookmarks)
    }

    /// Anchor peg commits on the remote so they survive garbage collection.
    pub fn push_commit_refs(&self, commits: &[String]) -> Result<(), GitError> {
        if commits.is_empty() {
            return Ok(());
        }
        let abbreviated: Vec<String> = commits
            .iter()
            .filter(|commit| !is_full_object_name(commit.as_str()))
            .cloned()
            .collect();
        if !abbreviated.is_empty() {
            return Err(GitError::InvalidPeg {
                commits: abbreviated,
            });
        }
        let specs: Vec<PushSpec> = commits
            .iter()
            .map(|commit| PushSpec {
                source: PushSource::Commit(commit.clone()),
                dest: format!("{REFERENCED_COMMITS_PREFIX}{commit}"),
                force: false,
            })
            .collect();
        self.keeper.git.push(&self.name, &specs)
    }

    pub fn delete<I, S>(&self, paths: I) -> Result<DeleteResult, GitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keeper.git.delete_casefile_paths(&self.name, paths)
    }
}

/// One shared casefile instance.
#[derive(Debug)]
pub struct CasefileRef<'a> {
    keeper: &'a CasefileKeeper,
    pub group_name: String,
    pub instance: String,
}

impl CasefileRef<'_> {
    pub fn path(&self) -> String {
        format!("{}/{}", self.group_name, self.instance)
    }

    pub fn load(&self) -> Result<Casefile, GitError> {
        self.keeper.git.get_casefile(&self.path(), None)
    }

    pub fn authors(&self) -> Result<Vec<String>, GitError> {
        self.keeper.git.get_casefile_authors(&self.path())
    }
}

/// A group of shared casefile instances, in tree order.
#[derive(Debug)]
pub struct CasefileGroup<'a> {
    pub name: String,
    pub instances: Vec<CasefileRef<'a>>,
}

/// A casefile that was deleted from the shared ref; still retrievable from
/// history.
#[derive(Debug)]
pub struct DeletedCasefileRef<'a> {
    keeper: &'a CasefileKeeper,
    pub deletion_commit: String,
    pub committed: DateTime<FixedOffset>,
    pub path: String,
}

impl DeletedCasefileRef<'_> {
    /// The casefile content as it was just before deletion.
    pub fn retrieve(&self) -> Result<Casefile, GitError> {
        self.keeper
            .git
            .get_casefile(&self.path, Some(&self.deletion_commit))
    }

    pub fn authors(&self) -> Result<Vec<String>, GitError> {
        self.keeper.git.get_casefile_authors(&self.path)
    }
}
