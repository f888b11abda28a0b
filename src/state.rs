//! Mount-wide shared state.
//!
//! One mounted instance per process: the store handle, the tag index, the
//! content directory and the open-handle table, all behind a single
//! readers-writer lock. Reads take it shared, mutations exclusive; that is
//! conservative but rules out every read-after-mutation anomaly the
//! dot-hiding rules would otherwise expose.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use crate::content::ContentStore;
use crate::core::permissions::Identity;
use crate::engine::index::{FileId, TagIndex};
use crate::error::Result;
use crate::storage::Store;

/// Open handle bookkeeping. `unlink` on an open file defers the physical
/// object deletion until the last handle goes away.
#[derive(Debug, Default)]
pub struct HandleTable {
    open: HashMap<FileId, usize>,
    doomed: HashSet<FileId>,
}

impl HandleTable {
    pub fn acquire(&mut self, id: FileId) {
        *self.open.entry(id).or_insert(0) += 1;
    }

    /// Drop one handle. Returns true when the object should be physically
    /// removed now (it was unlinked while open and this was the last handle).
    pub fn release(&mut self, id: FileId) -> bool {
        match self.open.get_mut(&id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.open.remove(&id);
                self.doomed.remove(&id)
            }
            None => self.doomed.remove(&id),
        }
    }

    pub fn is_open(&self, id: FileId) -> bool {
        self.open.contains_key(&id)
    }

    /// Mark an unlinked-while-open file for deletion on last release.
    pub fn doom(&mut self, id: FileId) {
        self.doomed.insert(id);
    }
}

/// Everything behind the mount's readers-writer lock.
pub struct MountState {
    pub store: Store,
    pub index: TagIndex,
    pub content: ContentStore,
    pub handles: Mutex<HandleTable>,
    pub mount_time: SystemTime,
    pub identity: Identity,
}

pub type SharedState = Arc<RwLock<MountState>>;

impl MountState {
    /// Open the store under the datastore root and rebuild the tag index.
    pub fn open(datastore: &Path) -> Result<Self> {
        let store = Store::open(datastore)?;
        let (entries, markers) = store.load()?;
        let index = TagIndex::rebuild(entries, markers);
        let content = ContentStore::new(store.object_root());
        tracing::info!(
            "[State] Index rebuilt: {} files, {} tags",
            index.file_count(),
            index.tag_count()
        );
        Ok(Self {
            store,
            index,
            content,
            handles: Mutex::new(HandleTable::default()),
            mount_time: SystemTime::now(),
            identity: Identity::capture(),
        })
    }
}
