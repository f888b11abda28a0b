//! Mutation Planner: filesystem mutations as store transactions.
//!
//! Every mutation validates its preconditions against the in-memory index
//! first (fail fast, before any transaction opens), then runs a single store
//! transaction, and only after the commit touches the index. A failed
//! transaction therefore leaves the index exactly as readers last saw it.
//!
//! Callers hold the exclusive half of the mount lock for everything in here.

use std::collections::BTreeSet;

use crate::core::path::{validate_name, DELETE_SENTINEL};
use crate::engine::index::{FileEntry, FileId};
use crate::engine::query;
use crate::error::{Result, TagError};
use crate::state::MountState;
use crate::storage;

impl MountState {
    /// `create(T . name)`: a new empty file tagged with the path prefix.
    /// With no prefix the file is untagged and appears only at the root.
    pub fn plan_create(&mut self, prefix: &[String], name: &str, mode: u32) -> Result<FileId> {
        validate_name(name)?;
        self.require_tags(prefix)?;
        self.require_free(prefix, name)?;

        let tags: BTreeSet<String> = prefix.iter().cloned().collect();
        let (uid, gid) = (self.identity.uid, self.identity.gid);
        let id = self.store.with_tx(|tx| {
            let id = storage::insert_file(tx, name, &tags, mode, uid, gid, false, None)?;
            for tag in &tags {
                storage::delete_marker(tx, tag)?;
            }
            Ok(id)
        })?;

        if let Err(e) = self.content.create(id) {
            // Roll the row back rather than leave a file with no bytes behind it.
            let _ = self.store.with_tx(|tx| storage::delete_file(tx, id));
            return Err(e);
        }

        for tag in &tags {
            self.index.remove_marker(tag);
        }
        self.index.insert(FileEntry {
            id,
            name: name.to_string(),
            tags: tags.clone(),
            mode,
            uid,
            gid,
            is_symlink: false,
            target: None,
        });
        tracing::debug!("[Planner] create {:?} tags={:?} -> {}", name, tags, id);
        Ok(id)
    }

    /// `symlink(target, T . name)`: stores the target verbatim; translation
    /// happens at read time.
    pub fn plan_symlink(&mut self, prefix: &[String], name: &str, target: &str) -> Result<FileId> {
        validate_name(name)?;
        self.require_tags(prefix)?;
        self.require_free(prefix, name)?;

        let tags: BTreeSet<String> = prefix.iter().cloned().collect();
        let (uid, gid) = (self.identity.uid, self.identity.gid);
        let id = self.store.with_tx(|tx| {
            let id = storage::insert_file(tx, name, &tags, 0o777, uid, gid, true, Some(target))?;
            for tag in &tags {
                storage::delete_marker(tx, tag)?;
            }
            Ok(id)
        })?;

        for tag in &tags {
            self.index.remove_marker(tag);
        }
        self.index.insert(FileEntry {
            id,
            name: name.to_string(),
            tags,
            mode: 0o777,
            uid,
            gid,
            is_symlink: true,
            target: Some(target.to_string()),
        });
        tracing::debug!("[Planner] symlink {:?} -> {:?}", name, target);
        Ok(id)
    }

    /// `mkdir(T . tag)`: at the root this persists an empty-tag marker.
    /// Deeper it succeeds without persisting anything: tag hierarchies carry
    /// no meaning, but file managers expect mkdir to work.
    pub fn plan_mkdir(&mut self, prefix: &[String], name: &str) -> Result<()> {
        validate_name(name)?;
        if !prefix.is_empty() {
            self.require_tags(prefix)?;
            tracing::debug!("[Planner] mkdir {:?} below {:?}: nothing to persist", name, prefix);
            return Ok(());
        }
        if self.index.by_name(name).is_some() || self.index.is_known(name) {
            return Err(TagError::Exists(name.to_string()));
        }
        self.store.with_tx(|tx| storage::insert_marker(tx, name))?;
        self.index.add_marker(name);
        tracing::debug!("[Planner] mkdir {:?}: new empty-tag marker", name);
        Ok(())
    }

    /// `unlink(T . name)`: at the root the file is destroyed; below, only
    /// the last path tag is taken off the file.
    pub fn plan_unlink(&mut self, prefix: &[String], name: &str) -> Result<()> {
        let entry = self.lookup_file(prefix, name)?.clone();
        match prefix.last() {
            None => {
                self.store.with_tx(|tx| storage::delete_file(tx, entry.id))?;
                self.index.remove(entry.id);
                if !entry.is_symlink {
                    let defer = {
                        let mut handles = self
                            .handles
                            .lock()
                            .map_err(|_| TagError::State("Poisoned lock".into()))?;
                        if handles.is_open(entry.id) {
                            handles.doom(entry.id);
                            true
                        } else {
                            false
                        }
                    };
                    if !defer {
                        // The row is already gone; a stray object is only
                        // worth a warning.
                        if let Err(e) = self.content.remove(entry.id) {
                            tracing::warn!("[Planner] object {} removal failed: {}", entry.id, e);
                        }
                    }
                }
                tracing::debug!("[Planner] unlink {:?}: file destroyed", name);
            }
            Some(last) => {
                let mut tags = entry.tags.clone();
                tags.remove(last);
                self.store.with_tx(|tx| storage::update_tags(tx, entry.id, &tags))?;
                self.index.retag(entry.id, tags);
                tracing::debug!("[Planner] unlink {:?}: dropped tag {:?}", name, last);
            }
        }
        Ok(())
    }

    /// `rmdir(T . tag)`: only empty projections can be removed. A borne tag
    /// disappears from listings on its own once the last file loses it, so
    /// below the root this is a successful no-op.
    pub fn plan_rmdir(&mut self, prefix: &[String], name: &str) -> Result<()> {
        self.require_tags(prefix)?;
        if !self.index.is_known(name) {
            return Err(TagError::NotFound(name.to_string()));
        }
        let mut full: Vec<String> = prefix.to_vec();
        full.push(name.to_string());
        if !query::matching_files(&self.index, &full).is_empty() {
            return Err(TagError::NotEmpty(name.to_string()));
        }
        if prefix.is_empty() && self.index.is_marker(name) {
            self.store.with_tx(|tx| storage::delete_marker(tx, name))?;
            self.index.remove_marker(name);
            tracing::debug!("[Planner] rmdir {:?}: marker removed", name);
        }
        Ok(())
    }

    /// `rename(src, dst)`: the overloaded one. A file source is retagged
    /// (additively when it was shown hidden, replacing when shown plain) and
    /// possibly renamed; a tag source is renamed across all its bearers,
    /// deleted via the `..deleteme` sentinel, or silently kept when dragged
    /// into another tag path.
    pub fn plan_rename(
        &mut self,
        src_prefix: &[String],
        src_name: &str,
        dst_prefix: &[String],
        dst_name: &str,
    ) -> Result<()> {
        self.require_tags(src_prefix)?;

        let file_match = self
            .index
            .by_name(src_name)
            .filter(|entry| src_prefix.iter().all(|t| entry.tags.contains(t)))
            .cloned();
        if let Some(entry) = file_match {
            return self.rename_file(entry, src_prefix, dst_prefix, dst_name);
        }

        if self.index.is_known(src_name) {
            if dst_name == DELETE_SENTINEL {
                return self.plan_rmdir(src_prefix, src_name);
            }
            return self.rename_tag(src_prefix, src_name, dst_prefix, dst_name);
        }

        Err(TagError::NotFound(src_name.to_string()))
    }

    /// chmod: mode persists for files; synthetic directories discard it.
    pub fn plan_chmod(&mut self, id: FileId, mode: u32) -> Result<()> {
        self.store.with_tx(|tx| storage::update_mode(tx, id, mode))?;
        self.index.set_mode(id, mode);
        Ok(())
    }

    pub fn plan_chown(&mut self, id: FileId, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let entry = self
            .index
            .get(id)
            .ok_or_else(|| TagError::NotFound(format!("file {id}")))?;
        let (uid, gid) = (uid.unwrap_or(entry.uid), gid.unwrap_or(entry.gid));
        self.store.with_tx(|tx| storage::update_owner(tx, id, uid, gid))?;
        self.index.set_owner(id, uid, gid);
        Ok(())
    }

    fn rename_file(
        &mut self,
        entry: FileEntry,
        src_prefix: &[String],
        dst_prefix: &[String],
        dst_name: &str,
    ) -> Result<()> {
        validate_name(dst_name)?;

        // Destination tags need not exist yet: a tag exists iff some file
        // bears it, so retagging into a fresh name is what creates it.
        let src_tags: BTreeSet<String> = src_prefix.iter().cloned().collect();
        let dst_tags: BTreeSet<String> = dst_prefix.iter().cloned().collect();

        // A source shown dotted still has tags the path did not account for,
        // so moving it adds tags. A source shown plain is fully described by
        // its path, and moving it replaces the tag set.
        let was_hidden = entry.tags != src_tags;
        let new_tags: BTreeSet<String> = if was_hidden {
            entry.tags.union(&dst_tags).cloned().collect()
        } else {
            dst_tags
        };

        if dst_name != entry.name && self.index.by_name(dst_name).is_some() {
            return Err(TagError::Exists(dst_name.to_string()));
        }
        if self.tag_visible_at(dst_prefix, dst_name) {
            return Err(TagError::Exists(dst_name.to_string()));
        }

        let id = entry.id;
        let renamed = dst_name != entry.name;
        self.store.with_tx(|tx| {
            storage::update_tags(tx, id, &new_tags)?;
            if renamed {
                storage::update_name(tx, id, dst_name)?;
            }
            for tag in &new_tags {
                storage::delete_marker(tx, tag)?;
            }
            Ok(())
        })?;

        for tag in &new_tags {
            self.index.remove_marker(tag);
        }
        self.index.retag(id, new_tags);
        if renamed {
            self.index.rename(id, dst_name.to_string());
        }
        tracing::debug!(
            "[Planner] rename file {:?} -> {:?} (additive: {})",
            entry.name,
            dst_name,
            was_hidden
        );
        Ok(())
    }

    fn rename_tag(
        &mut self,
        src_prefix: &[String],
        src_name: &str,
        dst_prefix: &[String],
        dst_name: &str,
    ) -> Result<()> {
        if src_prefix != dst_prefix {
            // Dragging a tag into another tag is accepted and discarded:
            // tag hierarchies carry no meaning here.
            tracing::debug!(
                "[Planner] tag {:?} moved into {:?}: accepted, nothing persisted",
                src_name,
                dst_prefix
            );
            return Ok(());
        }
        validate_name(dst_name)?;
        if self.index.is_known(dst_name) || self.index.by_name(dst_name).is_some() {
            return Err(TagError::Exists(dst_name.to_string()));
        }

        let ids: Vec<FileId> = self
            .index
            .tag_files(src_name)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        // One transaction across every bearer; readers never see a half
        // renamed tag.
        let index = &self.index;
        self.store.with_tx(|tx| {
            for id in &ids {
                if let Some(entry) = index.get(*id) {
                    let mut tags = entry.tags.clone();
                    tags.remove(src_name);
                    tags.insert(dst_name.to_string());
                    storage::update_tags(tx, *id, &tags)?;
                }
            }
            storage::rename_marker(tx, src_name, dst_name)?;
            Ok(())
        })?;

        self.index.rename_tag(src_name, dst_name);
        tracing::debug!(
            "[Planner] rename tag {:?} -> {:?} across {} files",
            src_name,
            dst_name,
            ids.len()
        );
        Ok(())
    }

    /// Every prefix component must already be a tag or a marker.
    fn require_tags(&self, prefix: &[String]) -> Result<()> {
        for tag in prefix {
            if !self.index.is_known(tag) {
                return Err(TagError::NotFound(tag.clone()));
            }
        }
        Ok(())
    }

    /// A create/rename target may collide neither with an existing file name
    /// (names are unique mount-wide) nor with a tag shown plain at this depth.
    fn require_free(&self, prefix: &[String], name: &str) -> Result<()> {
        if self.index.by_name(name).is_some() {
            return Err(TagError::Exists(name.to_string()));
        }
        if self.tag_visible_at(prefix, name) {
            return Err(TagError::Exists(name.to_string()));
        }
        Ok(())
    }

    /// Whether a tag (or marker) would be emitted undotted at this depth.
    fn tag_visible_at(&self, prefix: &[String], tag: &str) -> bool {
        if !self.index.is_known(tag) {
            return false;
        }
        if prefix.is_empty() {
            // The root never hides tags.
            return true;
        }
        let matches = query::matching_files(&self.index, prefix);
        query::refines(&self.index, &matches, tag)
    }

    /// The file `name` as reachable under `prefix`, or not found.
    fn lookup_file(&self, prefix: &[String], name: &str) -> Result<&FileEntry> {
        self.require_tags(prefix)?;
        let entry = self
            .index
            .by_name(name)
            .ok_or_else(|| TagError::NotFound(name.to_string()))?;
        if !prefix.iter().all(|t| entry.tags.contains(t)) {
            return Err(TagError::NotFound(name.to_string()));
        }
        Ok(entry)
    }
}
