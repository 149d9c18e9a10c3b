//! Value types: bookmarks, casefiles, casefile paths, deleted-casefile
//! records.
//!
//! A casefile is stored as a JSON blob `{"bookmarks": [...]}` inside the
//! shared-casefiles tree; its `path` is derived from the tree location and is
//! never written into the blob. Legacy blobs are a bare bookmark array.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Persistent identity of a bookmarked line: the commit that introduced it
/// and the line number it had there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peg {
    pub commit: String,
    pub line: u32,
}

/// Whether `text` is a full Git object name (40 or 64 hex characters).
pub(crate) fn is_full_object_name(text: &str) -> bool {
    matches!(text.len(), 40 | 64) && text.bytes().all(|b| b.is_ascii_hexdigit())
}

impl Peg {
    /// Whether `commit` is a full object name (40 or 64 hex characters).
    ///
    /// Pegs with abbreviated names can't be shared: the `\S*` suffix match
    /// in incremental-blame tracking tolerates them locally, but anchor refs
    /// and collaborators need the exact object.
    pub fn has_full_object_name(&self) -> bool {
        is_full_object_name(&self.commit)
    }
}

/// One bookmark in a casefile. Identity is structural; two bookmarks with
/// the same content are the same bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub file: String,
    pub line: u32,
    /// The marked text, used to re-find the bookmark in changed content.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Bookmark>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peg: Option<Peg>,
}

impl Bookmark {
    pub fn new(file: impl Into<String>, line: u32, text: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            text: text.into(),
            children: None,
            peg: None,
        }
    }
}

#[derive(Serialize)]
struct BlobForm<'a> {
    bookmarks: &'a [Bookmark],
}

/// Serialize a bookmark forest to the stored blob form without needing a
/// full [`Casefile`]. Content addressing depends on these bytes being stable
/// for equal input.
pub fn bookmarks_blob(bookmarks: &[Bookmark]) -> String {
    serde_json::to_string(&BlobForm { bookmarks }).expect("bookmark serialization is infallible")
}

#[derive(Deserialize)]
struct BlobObject {
    #[serde(default)]
    bookmarks: Vec<Bookmark>,
}

/// Accepts both the object form and the legacy bare-array form.
#[derive(Deserialize)]
#[serde(untagged)]
enum BlobOnDisk {
    Legacy(Vec<Bookmark>),
    Object(BlobObject),
}

/// A casefile: a path in the shared tree plus a bookmark forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Casefile {
    /// `<group>/<instance>`; derived from the tree, never stored in the blob.
    pub path: String,
    pub bookmarks: Vec<Bookmark>,
}

impl Casefile {
    pub fn new(path: impl Into<String>, bookmarks: Vec<Bookmark>) -> Self {
        Self {
            path: path.into(),
            bookmarks,
        }
    }

    /// Parse blob content, normalizing the legacy array form and injecting
    /// the tree-derived path.
    pub fn from_blob(path: impl Into<String>, blob: &str) -> Result<Self, serde_json::Error> {
        let bookmarks = match serde_json::from_str::<BlobOnDisk>(blob)? {
            BlobOnDisk::Legacy(bookmarks) => bookmarks,
            BlobOnDisk::Object(object) => object.bookmarks,
        };
        Ok(Self {
            path: path.into(),
            bookmarks,
        })
    }

    /// Serialize to the stored blob form. Byte-stable: the same bookmarks
    /// always produce the same bytes, so content addressing is meaningful.
    pub fn to_blob(&self) -> String {
        bookmarks_blob(&self.bookmarks)
    }

    /// All bookmarks in the forest, depth-first, parents before children.
    pub fn flatten_bookmarks(&self) -> Vec<&Bookmark> {
        fn walk<'a>(bookmarks: &'a [Bookmark], into: &mut Vec<&'a Bookmark>) {
            for bookmark in bookmarks {
                into.push(bookmark);
                if let Some(children) = &bookmark.children {
                    walk(children, into);
                }
            }
        }
        let mut all = Vec::new();
        walk(&self.bookmarks, &mut all);
        all
    }

    /// Distinct peg commits across the forest, in first-seen order.
    pub fn pegged_commits(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.flatten_bookmarks()
            .into_iter()
            .filter_map(|bookmark| bookmark.peg.as_ref())
            .filter(|peg| seen.insert(peg.commit.clone()))
            .map(|peg| peg.commit.clone())
            .collect()
    }
}

/// A `<group>/<instance>` pair. The split is at the right-most `/`, so a
/// group name may itself contain slashes; the instance may not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CasefilePath {
    group: String,
    instance: String,
}

impl CasefilePath {
    pub fn new(group: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            instance: instance.into(),
        }
    }

    /// Split a joined path. Returns `None` when either side would be empty.
    pub fn parse(path: &str) -> Option<Self> {
        let (group, instance) = path.rsplit_once('/')?;
        if group.is_empty() || instance.is_empty() {
            return None;
        }
        Some(Self::new(group, instance))
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl std::fmt::Display for CasefilePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group, self.instance)
    }
}

/// A casefile that was deleted from the shared ref at some commit, recovered
/// from the ref's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedCasefile {
    /// The commit that removed the casefile.
    pub commit: String,
    pub committed: DateTime<FixedOffset>,
    pub path: String,
}
