//! Fixture helpers: a temp repository with a bare "origin" remote.
#![allow(dead_code)] // each test binary uses a different subset

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use git_casefile::{CasefileKeeper, KeeperOptions};

pub struct TestRepo {
    pub dir: TempDir,
    pub remote_dir: TempDir,
}

impl TestRepo {
    /// An initialized repository with identity configured and a bare
    /// `origin` remote next to it.
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::with_prefix("casefile-repo-").expect("create repo dir");
        let remote_dir = TempDir::with_prefix("casefile-remote-").expect("create remote dir");

        run_git(remote_dir.path(), &["init", "-q", "--bare"]);

        let repo = Self { dir, remote_dir };
        repo.git(&["init", "-q", "-b", "main"]);
        repo.git(&["config", "user.name", "Test Author"]);
        repo.git(&["config", "user.email", "test@example.invalid"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        let remote_path = repo.remote_dir.path().to_string_lossy().into_owned();
        repo.git(&["remote", "add", "origin", remote_path.as_str()]);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run git in the repository, panicking on failure.
    pub fn git(&self, args: &[&str]) -> String {
        run_git(self.path(), args)
    }

    /// Run git against the bare remote, panicking on failure.
    pub fn remote_git(&self, args: &[&str]) -> String {
        run_git(self.remote_dir.path(), args)
    }

    /// Whether a ref exists, in the repo or the bare remote.
    pub fn ref_exists(&self, dir: &Path, refname: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", "-q", refname])
            .current_dir(dir)
            .output()
            .expect("run git rev-parse")
            .status
            .success()
    }

    pub fn write_file(&self, name: &str, content: &str) {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, content).expect("write file");
    }

    pub fn commit_all(&self, message: &str) -> String {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
        self.git(&["rev-parse", "HEAD"]).trim().to_string()
    }

    pub fn keeper(&self) -> CasefileKeeper {
        CasefileKeeper::new(KeeperOptions {
            cwd: Some(self.path().to_path_buf()),
            ..KeeperOptions::default()
        })
    }
}

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|err| panic!("failed to run git {args:?}: {err}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}
