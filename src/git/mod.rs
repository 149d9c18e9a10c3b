//! Git plumbing driver for the shared-casefiles ref.
//!
//! All state about which casefiles are shared lives in the tree of
//! [`SHARED_CASEFILES_REF`]: one subtree per group, one blob per casefile
//! instance. [`GitDriver`] owns every `git` invocation in the crate and the
//! share/delete pipelines over that tree.
//!
//! # Module organization
//!
//! - `mod.rs` - driver construction, ref/tree constants, wire value types
//! - `error.rs` - the [`GitError`] taxonomy
//! - `trees.rs` - object plumbing: `rev-parse`, `ls-tree`, `mktree`,
//!   `hash-object`, `commit-tree`, `cat-file`
//! - `sharing.rs` - the share and delete pipelines, `push`, `update-ref`
//! - `history.rs` - author listing, deleted-casefile log, last-change dates
//! - `blame.rs` - line introduction and current-line tracking
//! - `remotes.rs` - remote listing, fetches, commits-unknown probing

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use crate::record_stream::{RecordStream, Separator};
use crate::runner::{CommandRunner, CommandSpec, Invocation, Logger, Tracer};

mod blame;
mod error;
mod history;
mod remotes;
mod sharing;
mod trees;

pub use error::GitError;
pub use sharing::{DeleteResult, ShareResult};

/// The ref whose tip tree encodes every shared casefile.
pub const SHARED_CASEFILES_REF: &str = "refs/collaboration/shared-casefiles";

/// Prefix for remote refs that anchor commits referenced from bookmark pegs,
/// protecting them from garbage collection.
pub const REFERENCED_COMMITS_PREFIX: &str = "refs/collaboration/referenced-commits/";

/// Hash of the empty tree; the starting point when the shared ref does not
/// exist yet.
pub const EMPTY_TREE_HASH: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// One record of `ls-tree` output / one line fed to `mktree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: String,
    pub hash: String,
    /// Exactly one path level; never contains `/`.
    pub name: String,
}

impl TreeEntry {
    pub fn blob(hash: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: "100644".into(),
            kind: "blob".into(),
            hash: hash.into(),
            name: name.into(),
        }
    }

    pub fn subtree(hash: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: "040000".into(),
            kind: "tree".into(),
            hash: hash.into(),
            name: name.into(),
        }
    }
}

/// What a push updates the destination ref to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSource {
    Commit(String),
    /// Delete the ref on the remote (the `:<dest>` refspec form).
    Delete,
}

/// One refspec of a `git push`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSpec {
    pub source: PushSource,
    pub dest: String,
    pub force: bool,
}

impl PushSpec {
    pub fn to_refspec(&self) -> String {
        let force = if self.force { "+" } else { "" };
        match &self.source {
            PushSource::Commit(commit) => format!("{force}{commit}:{}", self.dest),
            PushSource::Delete => format!("{force}:{}", self.dest),
        }
    }
}

/// Casefile instances under one group name, in `ls-tree` traversal order.
///
/// Only *adjacent* records with the same group coalesce; an unsorted tree
/// would yield the same name more than once. Git emits sorted trees, so that
/// does not come up in practice, and the parser deliberately does not merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasefileGroup {
    pub name: String,
    pub instances: Vec<String>,
}

/// Construction options for [`GitDriver`].
#[derive(Debug, Default)]
pub struct GitDriverOptions {
    /// The `git` executable; defaults to `git` on `PATH`.
    pub binary: Option<PathBuf>,
    /// Repository directory commands run in; defaults to the process cwd.
    pub cwd: Option<PathBuf>,
    pub env: Option<std::collections::HashMap<String, String>>,
    pub timeout: Option<std::time::Duration>,
}

/// Drives `git` subprocesses; all casefile state changes go through here.
#[derive(Debug)]
pub struct GitDriver {
    runner: CommandRunner,
}

impl Default for GitDriver {
    fn default() -> Self {
        Self::new(GitDriverOptions::default())
    }
}

impl GitDriver {
    pub fn new(options: GitDriverOptions) -> Self {
        let mut spec = CommandSpec::new(
            options
                .binary
                .map(|p| p.into_os_string())
                .unwrap_or_else(|| "git".into()),
        )
        .subcommands(true);
        if let Some(cwd) = options.cwd {
            spec = spec.cwd(cwd);
        }
        if let Some(env) = options.env {
            spec = spec.env(env);
        }
        if let Some(timeout) = options.timeout {
            spec = spec.timeout(timeout);
        }
        Self {
            runner: CommandRunner::new(spec),
        }
    }

    /// Use a fully caller-configured runner (test loggers, tracers).
    pub fn with_runner(runner: CommandRunner) -> Self {
        Self { runner }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.runner = self.runner.with_logger(logger);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.runner = self.runner.with_tracer(tracer);
        self
    }

    /// Start a `git <subcommand>` invocation.
    pub(crate) fn cmd(&self, subcommand: &str) -> Invocation<'_> {
        self.runner.invoke().subcommand(subcommand)
    }

    /// Run an invocation, splitting stdout into records for `sink`.
    ///
    /// Returns the exit code; record handling stops early when the sink
    /// breaks, but the child still runs to completion.
    pub(crate) fn stream_records<F>(
        &self,
        invocation: Invocation<'_>,
        separator: Separator,
        sink: F,
    ) -> Result<i32, GitError>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        let mut records = RecordStream::new(separator, encoding_rs::UTF_8, sink)
            .map_err(|err| GitError::Bug(format!("record stream misconfigured: {err}")))?;
        let code = invocation.stream(|chunk, token| {
            records.push_str(chunk);
            if records.is_stopped() {
                token.stop();
            }
        })?;
        records.finish();
        Ok(code)
    }
}

/// Substitute a fallback for an expected-absence failure (missing ref,
/// missing subtree). Anything else propagates: infrastructure failures
/// (timeouts, spawn errors, broken output streams) and assertion errors
/// must reach the caller, never read as "nothing there".
pub(crate) fn recover_absent<T>(
    result: Result<T, GitError>,
    fallback: impl FnOnce() -> T,
) -> Result<T, GitError> {
    match result {
        Err(err) if err.is_expected_absence() => Ok(fallback()),
        other => other,
    }
}
