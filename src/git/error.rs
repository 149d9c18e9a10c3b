//! Git driver error taxonomy.

use crate::runner::RunnerError;

#[derive(Debug)]
pub enum GitError {
    /// A committish the caller supplied did not resolve.
    InvalidCommittish { committish: String },
    /// A write-side plumbing command (`hash-object`, `mktree`, `commit-tree`,
    /// `push`, `update-ref`) failed.
    GitWriteFailed { operation: String, detail: String },
    /// A tree entry name contained `/`; entries name exactly one level.
    InvalidTreeEntry { bad_entries: Vec<String> },
    /// `mktree` produced no hash, or collapsed non-empty input to the empty
    /// tree.
    InvalidTreeResult { output: String },
    /// `commit-tree` produced something that isn't an object name.
    InvalidCommit { output: String },
    /// The deleted-casefile log stream had a malformed commit-info record.
    InvalidGitLogOutput { record: String },
    /// Blame reported no originating commit for the line.
    NoCommitFound,
    /// Incremental blame ended without mapping the sought line.
    LineNotFound,
    /// A bookmark peg or anchor commit is not a full object name.
    InvalidPeg { commits: Vec<String> },
    /// Casefile blob content did not parse as JSON.
    InvalidBlob {
        path: String,
        source: serde_json::Error,
    },
    /// Subprocess infrastructure failure; always surfaces.
    Runner(RunnerError),
    /// A programmer-error assertion. Local recovery paths re-raise this
    /// unconditionally instead of substituting a fallback.
    Bug(String),
}

impl GitError {
    /// Whether this error must never be swallowed by local recovery.
    pub fn is_bug(&self) -> bool {
        matches!(self, GitError::Bug(_))
    }

    /// Whether this is an expected-absence failure: the command ran and
    /// reported the ref, subtree, or path missing. Only these may be
    /// recovered locally; subprocess infrastructure failures (timeouts,
    /// spawn errors, broken output streams) always surface.
    pub fn is_expected_absence(&self) -> bool {
        matches!(
            self,
            GitError::Runner(RunnerError::ChildProcessFailure { .. }) | GitError::NoCommitFound
        )
    }

    pub(crate) fn write_failed(operation: &str, detail: impl std::fmt::Display) -> Self {
        GitError::GitWriteFailed {
            operation: operation.to_string(),
            detail: detail.to_string(),
        }
    }
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::InvalidCommittish { committish } => {
                write!(f, "{committish:?} does not name a commit")
            }
            GitError::GitWriteFailed { operation, detail } => {
                write!(f, "git {operation} failed: {detail}")
            }
            GitError::InvalidTreeEntry { bad_entries } => {
                write!(f, "tree entry names may not contain '/': {bad_entries:?}")
            }
            GitError::InvalidTreeResult { output } => {
                write!(f, "git mktree returned an unusable tree: {output:?}")
            }
            GitError::InvalidCommit { output } => {
                write!(f, "git commit-tree returned an unusable commit: {output:?}")
            }
            GitError::InvalidGitLogOutput { record } => {
                write!(f, "unparseable commit-info record in git log output: {record:?}")
            }
            GitError::NoCommitFound => write!(f, "no commit found introducing the line"),
            GitError::LineNotFound => write!(f, "line position not found in current content"),
            GitError::InvalidPeg { commits } => {
                write!(f, "pegs must name full commit hashes: {commits:?}")
            }
            GitError::InvalidBlob { path, source } => {
                write!(f, "casefile blob at {path} is not valid JSON: {source}")
            }
            GitError::Runner(err) => write!(f, "{err}"),
            GitError::Bug(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for GitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GitError::Runner(err) => Some(err),
            GitError::InvalidBlob { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<RunnerError> for GitError {
    fn from(err: RunnerError) -> Self {
        GitError::Runner(err)
    }
}
