//! Tag Index: the in-memory inverted view of the store.
//!
//! The store owns all persistent state; this index is a derived,
//! reconstructible view keyed by `FileId`. It is rebuilt at mount and
//! updated in lockstep with every committed mutation, so readers under the
//! shared lock always observe a committed state and never a partial one.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

pub type FileId = i64;

/// One file as the engine sees it. Content bytes live elsewhere (object
/// directory for regular files, `target` for symlinks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: FileId,
    pub name: String,
    pub tags: BTreeSet<String>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub is_symlink: bool,
    pub target: Option<String>,
}

#[derive(Debug, Default)]
pub struct TagIndex {
    files: HashMap<FileId, FileEntry>,
    names: HashMap<String, FileId>,
    tags: HashMap<String, HashSet<FileId>>,
    markers: BTreeSet<String>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the whole view from a store dump. Called once at mount.
    pub fn rebuild(entries: Vec<FileEntry>, markers: BTreeSet<String>) -> Self {
        let mut index = Self { markers, ..Self::default() };
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    pub fn insert(&mut self, entry: FileEntry) {
        self.names.insert(entry.name.clone(), entry.id);
        for tag in &entry.tags {
            self.tags.entry(tag.clone()).or_default().insert(entry.id);
        }
        self.files.insert(entry.id, entry);
    }

    pub fn remove(&mut self, id: FileId) -> Option<FileEntry> {
        let entry = self.files.remove(&id)?;
        self.names.remove(&entry.name);
        for tag in &entry.tags {
            if let Some(ids) = self.tags.get_mut(tag) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(entry)
    }

    /// Replace a file's tag set, keeping the inverted view in step.
    pub fn retag(&mut self, id: FileId, tags: BTreeSet<String>) {
        let old = match self.files.get_mut(&id) {
            Some(entry) => std::mem::replace(&mut entry.tags, tags.clone()),
            None => return,
        };
        for tag in old.difference(&tags) {
            if let Some(ids) = self.tags.get_mut(tag) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        for tag in tags.difference(&old) {
            self.tags.entry(tag.clone()).or_default().insert(id);
        }
    }

    pub fn rename(&mut self, id: FileId, name: String) {
        if let Some(entry) = self.files.get_mut(&id) {
            let old = std::mem::replace(&mut entry.name, name.clone());
            self.names.remove(&old);
            self.names.insert(name, id);
        }
    }

    /// Rewrite `old` to `new` across every file bearing it, atomically from
    /// the point of view of readers (callers hold the exclusive lock).
    pub fn rename_tag(&mut self, old: &str, new: &str) {
        if let Some(ids) = self.tags.remove(old) {
            for id in &ids {
                if let Some(entry) = self.files.get_mut(id) {
                    entry.tags.remove(old);
                    entry.tags.insert(new.to_string());
                }
            }
            self.tags.entry(new.to_string()).or_default().extend(ids);
        }
        if self.markers.remove(old) {
            self.markers.insert(new.to_string());
        }
    }

    pub fn set_mode(&mut self, id: FileId, mode: u32) {
        if let Some(entry) = self.files.get_mut(&id) {
            entry.mode = mode;
        }
    }

    pub fn set_owner(&mut self, id: FileId, uid: u32, gid: u32) {
        if let Some(entry) = self.files.get_mut(&id) {
            entry.uid = uid;
            entry.gid = gid;
        }
    }

    pub fn add_marker(&mut self, name: &str) {
        self.markers.insert(name.to_string());
    }

    pub fn remove_marker(&mut self, name: &str) {
        self.markers.remove(name);
    }

    pub fn is_marker(&self, name: &str) -> bool {
        self.markers.contains(name)
    }

    /// Borne by at least one file.
    pub fn is_tag(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    /// A tag or an empty-tag marker; anything that resolves as a directory.
    pub fn is_known(&self, name: &str) -> bool {
        self.is_tag(name) || self.is_marker(name)
    }

    pub fn get(&self, id: FileId) -> Option<&FileEntry> {
        self.files.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&FileEntry> {
        self.names.get(name).and_then(|id| self.files.get(id))
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn tag_files(&self, tag: &str) -> Option<&HashSet<FileId>> {
        self.tags.get(tag)
    }

    pub fn all_tags(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    pub fn markers(&self) -> impl Iterator<Item = &str> {
        self.markers.iter().map(String::as_str)
    }

    /// True iff the inverted view is exactly the union of all file tag sets
    /// and markers are disjoint from borne tags.
    pub fn is_consistent(&self) -> bool {
        let mut expected: HashMap<&str, HashSet<FileId>> = HashMap::new();
        for entry in self.files.values() {
            for tag in &entry.tags {
                expected.entry(tag.as_str()).or_default().insert(entry.id);
            }
        }
        if expected.len() != self.tags.len() {
            return false;
        }
        for (tag, ids) in &expected {
            if self.tags.get(*tag) != Some(ids) {
                return false;
            }
        }
        self.markers.iter().all(|m| !expected.contains_key(m.as_str()))
    }
}
