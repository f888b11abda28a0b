//! Visibility Projector: query results to directory listings.
//!
//! A file is shown plain when the path fully accounts for its tags and
//! dot-hidden when tags remain unaccounted for. Tags are shown plain when
//! they would still narrow the selection, dot-hidden otherwise, and never
//! hidden at the mount root. Empty-tag markers surface only at the root.

use std::collections::HashSet;

use crate::engine::index::TagIndex;
use crate::engine::query;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Canonical name, without the presentation dot.
    pub name: String,
    pub hidden: bool,
    pub kind: EntryKind,
}

/// Directory listing for a tag path, before the synthetic `.`/`..` entries.
pub fn listing(index: &TagIndex, tags: &[String]) -> Vec<ListingEntry> {
    let matches = query::matching_files(index, tags);
    let at_root = tags.is_empty();
    let tag_set: HashSet<&str> = tags.iter().map(String::as_str).collect();

    let mut entries = Vec::new();
    let mut file_names: HashSet<&str> = HashSet::new();

    // Files first: when a file and a tag share a name, the file wins and the
    // tag is omitted at this depth.
    for id in &matches {
        let Some(entry) = index.get(*id) else { continue };
        let visible = entry.tags.len() == tag_set.len()
            && entry.tags.iter().all(|t| tag_set.contains(t.as_str()));
        file_names.insert(entry.name.as_str());
        entries.push(ListingEntry {
            name: entry.name.clone(),
            hidden: !visible,
            kind: if entry.is_symlink { EntryKind::Symlink } else { EntryKind::File },
        });
    }

    for tag in index.all_tags() {
        if tag_set.contains(tag) || file_names.contains(tag) {
            continue;
        }
        let visible = at_root || query::refines(index, &matches, tag);
        entries.push(ListingEntry {
            name: tag.to_string(),
            hidden: !visible,
            kind: EntryKind::Dir,
        });
    }

    if at_root {
        for marker in index.markers() {
            if file_names.contains(marker) {
                continue;
            }
            entries.push(ListingEntry {
                name: marker.to_string(),
                hidden: false,
                kind: EntryKind::Dir,
            });
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}
