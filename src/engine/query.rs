//! Query Engine: tag lists to file sets.
//!
//! Matching ignores path order; `a/b` and `b/a` select the same files.
//! Order matters only to the callers that care about it (symlink depth and
//! which tag an unlink strips).

use std::collections::HashSet;

use crate::engine::index::{FileId, TagIndex};
use crate::error::{Result, TagError};

/// Files carrying every tag in `tags`. The empty query matches everything.
///
/// A marker (or unknown name) contributes an empty set, so any path through
/// one matches nothing; resolution decides separately whether the path is a
/// directory at all.
pub fn matching_files(index: &TagIndex, tags: &[String]) -> HashSet<FileId> {
    if tags.is_empty() {
        return index.files().map(|f| f.id).collect();
    }
    let mut sets: Vec<&HashSet<FileId>> = Vec::with_capacity(tags.len());
    for tag in tags {
        match index.tag_files(tag) {
            Some(ids) => sets.push(ids),
            None => return HashSet::new(),
        }
    }
    // Intersect outward from the rarest tag.
    sets.sort_by_key(|ids| ids.len());
    let mut sets = sets.into_iter();
    let Some(first) = sets.next() else {
        return HashSet::new();
    };
    let rest: Vec<&HashSet<FileId>> = sets.collect();
    first
        .iter()
        .filter(|id| rest.iter().all(|ids| ids.contains(id)))
        .copied()
        .collect()
}

/// True if appending `tag` to the query behind `matches` still leaves at
/// least one file.
pub fn refines(index: &TagIndex, matches: &HashSet<FileId>, tag: &str) -> bool {
    index
        .tag_files(tag)
        .map_or(false, |ids| ids.iter().any(|id| matches.contains(id)))
}

/// What a fully resolved component path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    /// A synthetic directory projected from the tags on the path.
    Dir,
    /// A stored file reachable under the path's tag prefix.
    File(FileId),
}

/// Resolve a component path, applying the file-beats-tag rule: a file whose
/// tag set covers the prefix wins over a tag of the same name.
pub fn resolve(index: &TagIndex, components: &[String]) -> Result<Node> {
    let Some((leaf, prefix)) = components.split_last() else {
        return Ok(Node::Dir);
    };
    for tag in prefix {
        if !index.is_known(tag) {
            return Err(TagError::NotFound(tag.clone()));
        }
    }
    if let Some(entry) = index.by_name(leaf) {
        if prefix.iter().all(|tag| entry.tags.contains(tag)) {
            return Ok(Node::File(entry.id));
        }
    }
    if index.is_known(leaf) {
        return Ok(Node::Dir);
    }
    Err(TagError::NotFound(leaf.clone()))
}
