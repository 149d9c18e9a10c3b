//! Remote listing, fetches, and probing which peg commits a remote already
//! has.

use rayon::prelude::*;

use super::{GitDriver, GitError, SHARED_CASEFILES_REF};

/// How many `branch --contains` probes run concurrently.
const COMMIT_PROBE_BATCH: usize = 8;

impl GitDriver {
    /// Names of all configured remotes.
    pub fn get_list_of_remotes(&self) -> Result<Vec<String>, GitError> {
        let stdout = self.cmd("remote").run()?;
        Ok(stdout.lines().map(str::to_string).collect())
    }

    /// Plain `git fetch` from a remote.
    pub fn fetch_from_remote(&self, remote: &str) -> Result<(), GitError> {
        self.cmd("fetch").arg(remote).run()?;
        Ok(())
    }

    /// Fetch the shared-casefiles ref (and any sub-refs) from a remote,
    /// force-updating the local copy.
    pub fn fetch_shared_casefiles_from_remote(&self, remote: &str) -> Result<(), GitError> {
        self.cmd("fetch")
            .arg(remote)
            .arg(format!(
                "+{SHARED_CASEFILES_REF}*:{SHARED_CASEFILES_REF}*"
            ))
            .run()?;
        Ok(())
    }

    /// Whether any branch of `remote` contains `commit`.
    ///
    /// Any stdout at all means "known"; the exit code is ignored because an
    /// object the local repository has never seen also makes `--contains`
    /// fail, and that too means the remote can't be shown to have it.
    pub(crate) fn test_if_commit_known_to_remote(
        &self,
        remote: &str,
        commit: &str,
    ) -> Result<bool, GitError> {
        let (_code, stdout) = self
            .cmd("branch")
            .flag("r")
            .opt("contains", commit)
            .arg(format!("{remote}/*"))
            .output()?;
        Ok(!stdout.trim().is_empty())
    }

    /// Filter `commits` down to the ones no branch of `remote` contains,
    /// preserving input order. Probes run in batches of eight.
    pub fn select_commits_unknown_to_remote(
        &self,
        remote: &str,
        commits: &[String],
    ) -> Result<Vec<String>, GitError> {
        let mut unknown = Vec::new();
        for batch in commits.chunks(COMMIT_PROBE_BATCH) {
            let known: Vec<bool> = batch
                .par_iter()
                .map(|commit| self.test_if_commit_known_to_remote(remote, commit))
                .collect::<Result<_, GitError>>()?;
            for (commit, known) in batch.iter().zip(known) {
                if !known {
                    unknown.push(commit.clone());
                }
            }
        }
        Ok(unknown)
    }
}
