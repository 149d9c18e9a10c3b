//! End-to-end flows against a real repository: share, list, retrieve,
//! delete, and the deleted-casefile history.

mod common;

use common::TestRepo;
use git_casefile::casefile::{Bookmark, Casefile, Peg};
use git_casefile::git::{DeleteResult, SHARED_CASEFILES_REF, ShareResult};
use git_casefile::keeper::CommitsKnown;

fn sample_casefile(path: &str) -> Casefile {
    Casefile::new(path, vec![Bookmark::new("notes.txt", 2, "remember this")])
}

#[test]
fn share_creates_ref_and_pushes_to_remote() {
    let repo = TestRepo::new();
    let keeper = repo.keeper();
    let remote = keeper.remote("origin");

    let result = remote.share(&sample_casefile("a/b")).unwrap();
    let ShareResult::Shared { commit } = &result else {
        panic!("expected a fresh share, got {result:?}");
    };

    // The local ref and the remote ref both point at the new commit.
    assert_eq!(
        repo.git(&["rev-parse", SHARED_CASEFILES_REF]).trim(),
        commit
    );
    assert_eq!(
        repo.remote_git(&["rev-parse", SHARED_CASEFILES_REF]).trim(),
        commit
    );
    // A first share has no parents.
    let parents = repo.git(&["rev-list", "--parents", "-n1", commit.as_str()]);
    assert_eq!(parents.split_whitespace().count(), 1);
}

#[test]
fn shared_casefiles_are_listed_and_loadable() {
    let repo = TestRepo::new();
    let keeper = repo.keeper();
    let remote = keeper.remote("origin");
    remote.share(&sample_casefile("a casefile/22218950")).unwrap();
    remote.share(&sample_casefile("a casefile/ed421d07")).unwrap();
    remote.share(&sample_casefile("other/xyz")).unwrap();

    let groups = keeper.casefile_groups().unwrap();
    let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, ["a casefile", "other"]);
    assert_eq!(groups[0].instances.len(), 2);
    assert_eq!(groups[0].instances[0].path(), "a casefile/22218950");

    let loaded = groups[0].instances[0].load().unwrap();
    assert_eq!(loaded.path, "a casefile/22218950");
    assert_eq!(loaded.bookmarks[0].text, "remember this");
}

#[test]
fn sharing_identical_content_is_a_no_op() {
    let repo = TestRepo::new();
    let keeper = repo.keeper();
    let remote = keeper.remote("origin");

    let first = remote.share(&sample_casefile("a/b")).unwrap();
    let again = remote.share(&sample_casefile("a/b")).unwrap();
    assert!(matches!(again, ShareResult::NoChanges { .. }));
    assert_eq!(again.message(), "no changes to share");

    // Neither ref moved.
    assert_eq!(
        repo.git(&["rev-parse", SHARED_CASEFILES_REF]).trim(),
        first.commit()
    );
    assert_eq!(
        repo.remote_git(&["rev-parse", SHARED_CASEFILES_REF]).trim(),
        first.commit()
    );
}

#[test]
fn sharing_changed_content_extends_history() {
    let repo = TestRepo::new();
    let keeper = repo.keeper();
    let remote = keeper.remote("origin");

    let first = remote.share(&sample_casefile("a/b")).unwrap();
    let mut updated = sample_casefile("a/b");
    updated.bookmarks.push(Bookmark::new("other.txt", 9, "more"));
    let second = remote.share(&updated).unwrap();

    let ShareResult::Shared { commit } = &second else {
        panic!("expected an update, got {second:?}");
    };
    let first_parent = format!("{commit}^");
    let parent = repo.git(&["rev-parse", first_parent.as_str()]);
    assert_eq!(parent.trim(), first.commit());

    let loaded = keeper.git().get_casefile("a/b", None).unwrap();
    assert_eq!(loaded.bookmarks.len(), 2);
}

#[test]
fn deleting_the_last_casefile_deletes_the_ref() {
    let repo = TestRepo::new();
    let keeper = repo.keeper();
    let remote = keeper.remote("origin");
    remote.share(&sample_casefile("a/b")).unwrap();

    let result = remote.delete(["a/b"]).unwrap();
    assert_eq!(result, DeleteResult::RefDeleted);
    assert!(!repo.ref_exists(repo.path(), SHARED_CASEFILES_REF));
    assert!(!repo.ref_exists(repo.remote_dir.path(), SHARED_CASEFILES_REF));
}

#[test]
fn deleting_a_subset_keeps_the_rest() {
    let repo = TestRepo::new();
    let keeper = repo.keeper();
    let remote = keeper.remote("origin");
    remote.share(&sample_casefile("a/b")).unwrap();
    remote.share(&sample_casefile("a/c")).unwrap();
    remote.share(&sample_casefile("z/q")).unwrap();

    let result = remote.delete(["a/b"]).unwrap();
    assert!(matches!(result, DeleteResult::Updated { .. }));

    let groups = keeper.casefile_groups().unwrap();
    let listing: Vec<(String, Vec<String>)> = groups
        .iter()
        .map(|g| {
            (
                g.name.clone(),
                g.instances.iter().map(|i| i.instance.clone()).collect(),
            )
        })
        .collect();
    assert_eq!(
        listing,
        [
            ("a".to_string(), vec!["c".to_string()]),
            ("z".to_string(), vec!["q".to_string()]),
        ]
    );

    // Deleting an already-gone path is monotone.
    let again = remote.delete(["a/b"]).unwrap();
    assert_eq!(again, DeleteResult::NoChanges);
}

#[test]
fn deleted_casefiles_can_be_listed_and_retrieved() {
    let repo = TestRepo::new();
    let keeper = repo.keeper();
    let remote = keeper.remote("origin");
    remote.share(&sample_casefile("a/b")).unwrap();
    remote.share(&sample_casefile("keep/this")).unwrap();
    remote.delete(["a/b"]).unwrap();

    let deleted = keeper.deleted_casefiles(None).unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].path, "a/b");

    let recovered = deleted[0].retrieve().unwrap();
    assert_eq!(recovered.path, "a/b");
    assert_eq!(recovered.bookmarks[0].text, "remember this");

    // A partial that matches nothing filters everything out.
    let none = keeper.deleted_casefiles(Some("zzz")).unwrap();
    assert!(none.is_empty());
}

#[test]
fn authors_are_deduped_and_sorted() {
    let repo = TestRepo::new();
    let keeper = repo.keeper();
    let remote = keeper.remote("origin");
    remote.share(&sample_casefile("a/b")).unwrap();
    let mut updated = sample_casefile("a/b");
    updated.bookmarks.push(Bookmark::new("x", 1, "y"));
    remote.share(&updated).unwrap();

    let groups = keeper.casefile_groups().unwrap();
    let authors = groups[0].instances[0].authors().unwrap();
    assert_eq!(authors, ["Test Author"]);
}

#[test]
fn legacy_array_blobs_load_through_the_shared_tree() {
    use git_casefile::git::TreeEntry;

    let repo = TestRepo::new();
    let keeper = repo.keeper();

    // Hand-craft a shared tree holding a legacy (bare array) blob.
    let legacy = r#"[{"file":"old.txt","line":3,"text":"legacy"}]"#;
    let blob = keeper.git().hash_object_write(legacy).unwrap();
    let group_tree = keeper
        .git()
        .mktree(&[TreeEntry::blob(blob, "legacy-inst")])
        .unwrap();
    let root_tree = keeper
        .git()
        .mktree(&[TreeEntry::subtree(group_tree, "old")])
        .unwrap();
    let commit = repo.git(&["commit-tree", "-m", "seed", root_tree.as_str()]);
    keeper
        .git()
        .update_ref(SHARED_CASEFILES_REF, Some(commit.trim()))
        .unwrap();

    let loaded = keeper.git().get_casefile("old/legacy-inst", None).unwrap();
    assert_eq!(loaded.path, "old/legacy-inst");
    assert_eq!(loaded.bookmarks.len(), 1);
    assert_eq!(loaded.bookmarks[0].text, "legacy");

    // The stored bytes really are the bare-array form.
    let raw = keeper
        .git()
        .get_blob_content("old/legacy-inst", SHARED_CASEFILES_REF)
        .unwrap();
    assert!(raw.starts_with('['));
}

#[test]
fn commits_unknown_tracks_pushed_state() {
    let repo = TestRepo::new();
    repo.write_file("notes.txt", "alpha\nbeta\ngamma\n");
    let head = repo.commit_all("seed");

    let keeper = repo.keeper();
    let remote = keeper.remote("origin");

    let mut bookmark = Bookmark::new("notes.txt", 2, "beta");
    bookmark.peg = Some(Peg {
        commit: head.clone(),
        line: 2,
    });
    let casefile = Casefile::new("g/i", vec![bookmark]);

    // Nothing pushed yet: the peg commit is unknown to origin.
    assert_eq!(
        remote.commits_unknown(&casefile).unwrap(),
        CommitsKnown::Unknown(vec![head.clone()])
    );

    repo.git(&["push", "-q", "origin", "main"]);
    assert_eq!(
        remote.commits_unknown(&casefile).unwrap(),
        CommitsKnown::AllKnown
    );
}

#[test]
fn push_commit_refs_anchors_commits_on_the_remote() {
    let repo = TestRepo::new();
    repo.write_file("notes.txt", "alpha\n");
    let head = repo.commit_all("seed");

    let keeper = repo.keeper();
    keeper
        .remote("origin")
        .push_commit_refs(std::slice::from_ref(&head))
        .unwrap();

    let anchor_ref = format!("refs/collaboration/referenced-commits/{head}");
    let anchored = repo.remote_git(&["rev-parse", anchor_ref.as_str()]);
    assert_eq!(anchored.trim(), head);
}
