//! Inode bookkeeping for the kernel side.
//!
//! The kernel speaks inodes; the engine speaks ordered component paths.
//! This table hands out a stable inode per distinct component path and
//! answers the reverse question. Entries are never evicted: the kernel may
//! hold an inode for as long as it likes, and a path that stopped meaning
//! anything simply fails to resolve on its next use.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// FUSE convention: inode 1 is the mount root.
pub const ROOT_INO: u64 = 1;

#[derive(Debug)]
pub struct InodeTable {
    next: AtomicU64,
    by_path: DashMap<Vec<String>, u64>,
    by_ino: DashMap<u64, Vec<String>>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            next: AtomicU64::new(ROOT_INO + 1),
            by_path: DashMap::new(),
            by_ino: DashMap::new(),
        };
        table.by_path.insert(Vec::new(), ROOT_INO);
        table.by_ino.insert(ROOT_INO, Vec::new());
        table
    }

    /// Inode for a component path, assigning a fresh one on first sight.
    pub fn assign(&self, components: &[String]) -> u64 {
        if let Some(ino) = self.by_path.get(components) {
            return *ino;
        }
        let ino = *self
            .by_path
            .entry(components.to_vec())
            .or_insert_with(|| self.next.fetch_add(1, Ordering::SeqCst));
        self.by_ino.entry(ino).or_insert_with(|| components.to_vec());
        tracing::trace!("[InodeTable] {:?} -> {}", components, ino);
        ino
    }

    pub fn components(&self, ino: u64) -> Option<Vec<String>> {
        self.by_ino.get(&ino).map(|c| c.clone())
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comps(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.assign(&[]), ROOT_INO);
        assert_eq!(table.components(ROOT_INO), Some(Vec::new()));
    }

    #[test]
    fn assignment_is_stable_and_order_sensitive() {
        let table = InodeTable::new();
        let ab = table.assign(&comps(&["a", "b"]));
        let ba = table.assign(&comps(&["b", "a"]));
        assert_eq!(ab, table.assign(&comps(&["a", "b"])));
        // Same query, different spelling: the kernel sees distinct dentries.
        assert_ne!(ab, ba);
        assert_eq!(table.components(ab), Some(comps(&["a", "b"])));
    }
}
