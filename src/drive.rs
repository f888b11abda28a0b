//! TagDrive: the synchronous FUSE loop.
//!
//! A thin dispatcher between kernel callbacks and the engine: map the inode
//! to its component path, take the readers-writer lock the right way round,
//! route to query/projection or the planner, translate errors to errnos.
//! No semantics live here.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};

use crate::content;
use crate::core::inode_table::{InodeTable, ROOT_INO};
use crate::core::path as tagpath;
use crate::engine::index::{FileEntry, FileId};
use crate::engine::project::{self, EntryKind};
use crate::engine::query::{self, Node};
use crate::error::{Result, TagError};
use crate::state::{MountState, SharedState};

const TTL: Duration = Duration::from_secs(1);

pub struct TagDrive {
    pub state: SharedState,
    inodes: Arc<InodeTable>,
}

impl TagDrive {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            inodes: Arc::new(InodeTable::new()),
        }
    }

    fn components_of(&self, ino: u64) -> Result<Vec<String>> {
        self.inodes
            .components(ino)
            .ok_or_else(|| TagError::NotFound(format!("inode {ino}")))
    }

    fn base_attr(
        &self,
        state: &MountState,
        ino: u64,
        kind: FileType,
        perm: u16,
        nlink: u32,
        size: u64,
        time: SystemTime,
    ) -> fuser::FileAttr {
        fuser::FileAttr {
            ino,
            size,
            blocks: (size + 511) / 512,
            atime: time,
            mtime: time,
            ctime: time,
            crtime: time,
            kind,
            perm,
            nlink,
            uid: state.identity.uid,
            gid: state.identity.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    /// Synthetic directory: fixed mode, stable timestamps from mount time.
    fn dir_attr(&self, state: &MountState, ino: u64) -> fuser::FileAttr {
        self.base_attr(state, ino, FileType::Directory, 0o755, 2, 0, state.mount_time)
    }

    /// Stored file: metadata from the catalog entry plus the object file.
    /// `depth` is the number of tags on the requesting path; symlink sizes
    /// depend on it because readlink translation does.
    fn file_attr(
        &self,
        state: &MountState,
        ino: u64,
        entry: &FileEntry,
        depth: usize,
    ) -> Result<fuser::FileAttr> {
        if entry.is_symlink {
            let target = entry.target.as_deref().unwrap_or_default();
            let translated = content::translate_target(target, depth);
            let mut attr = self.base_attr(
                state,
                ino,
                FileType::Symlink,
                (entry.mode & 0o7777) as u16,
                1,
                translated.len() as u64,
                state.mount_time,
            );
            attr.uid = entry.uid;
            attr.gid = entry.gid;
            Ok(attr)
        } else {
            let stat = state.content.stat(entry.id, state.mount_time)?;
            let mut attr = self.base_attr(
                state,
                ino,
                FileType::RegularFile,
                (entry.mode & 0o7777) as u16,
                1,
                stat.size,
                state.mount_time,
            );
            attr.atime = stat.atime;
            attr.mtime = stat.mtime;
            attr.ctime = stat.ctime;
            attr.uid = entry.uid;
            attr.gid = entry.gid;
            Ok(attr)
        }
    }

    /// Attributes for an already-normalized component path.
    fn attr_for(&self, state: &MountState, comps: &[String]) -> Result<fuser::FileAttr> {
        let ino = self.inodes.assign(comps);
        match query::resolve(&state.index, comps)? {
            Node::Dir => Ok(self.dir_attr(state, ino)),
            Node::File(id) => {
                let entry = state
                    .index
                    .get(id)
                    .ok_or_else(|| TagError::State("index out of step".into()))?;
                self.file_attr(state, ino, entry, comps.len().saturating_sub(1))
            }
        }
    }
}

impl Filesystem for TagDrive {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> std::result::Result<(), i32> {
        tracing::info!("[TagDrive] FUSE initialized");
        Ok(())
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let state = self.state.read().unwrap();
        let result = (|| -> Result<fuser::FileAttr> {
            let mut comps = self.components_of(parent)?;
            match name.to_str() {
                Some(".") => {}
                Some("..") => {
                    comps.pop();
                }
                _ => comps.push(tagpath::component(name)?),
            }
            self.attr_for(&state, &comps)
        })();
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let state = self.state.read().unwrap();
        let result = self
            .components_of(ino)
            .and_then(|comps| self.attr_for(&state, &comps));
        match result {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let mut state = self.state.write().unwrap();
        let result = (|| -> Result<fuser::FileAttr> {
            let comps = self.components_of(ino)?;
            match query::resolve(&state.index, &comps)? {
                Node::Dir => {
                    // Synthetic directories accept and discard attribute
                    // changes; there is nothing to store them on.
                    Ok(self.dir_attr(&state, ino))
                }
                Node::File(id) => {
                    if let Some(mode) = mode {
                        state.plan_chmod(id, mode & 0o7777)?;
                    }
                    if uid.is_some() || gid.is_some() {
                        state.plan_chown(id, uid, gid)?;
                    }
                    let is_symlink = state
                        .index
                        .get(id)
                        .map_or(false, |entry| entry.is_symlink);
                    if !is_symlink {
                        if let Some(size) = size {
                            state.content.truncate(id, size)?;
                        }
                        if let Some(mtime) = mtime {
                            let when = match mtime {
                                TimeOrNow::SpecificTime(t) => t,
                                TimeOrNow::Now => SystemTime::now(),
                            };
                            state.content.set_mtime(id, when)?;
                        }
                    }
                    let entry = state
                        .index
                        .get(id)
                        .ok_or_else(|| TagError::State("index out of step".into()))?;
                    self.file_attr(&state, ino, entry, comps.len().saturating_sub(1))
                }
            }
        })();
        match result {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let state = self.state.read().unwrap();
        let result = (|| -> Result<Vec<u8>> {
            let comps = self.components_of(ino)?;
            let Node::File(id) = query::resolve(&state.index, &comps)? else {
                return Err(TagError::Invalid("not a symlink".into()));
            };
            let entry = state
                .index
                .get(id)
                .ok_or_else(|| TagError::State("index out of step".into()))?;
            if !entry.is_symlink {
                return Err(TagError::Invalid("not a symlink".into()));
            }
            let target = entry.target.as_deref().unwrap_or_default();
            Ok(content::translate_target(target, comps.len().saturating_sub(1)).into_bytes())
        })();
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let mut state = self.state.write().unwrap();
        let result = (|| -> Result<fuser::FileAttr> {
            let prefix = self.components_of(parent)?;
            let name = tagpath::component(name)?;
            state.plan_create(&prefix, &name, mode & 0o7777)?;
            let mut comps = prefix;
            comps.push(name);
            self.attr_for(&state, &comps)
        })();
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let mut state = self.state.write().unwrap();
        let result = (|| -> Result<fuser::FileAttr> {
            let prefix = self.components_of(parent)?;
            let name = tagpath::component(name)?;
            state.plan_mkdir(&prefix, &name)?;
            let mut comps = prefix;
            comps.push(name);
            Ok(self.dir_attr(&state, self.inodes.assign(&comps)))
        })();
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let mut state = self.state.write().unwrap();
        let result = (|| -> Result<()> {
            let prefix = self.components_of(parent)?;
            let name = tagpath::component(name)?;
            state.plan_unlink(&prefix, &name)
        })();
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let mut state = self.state.write().unwrap();
        let result = (|| -> Result<()> {
            let prefix = self.components_of(parent)?;
            let name = tagpath::component(name)?;
            state.plan_rmdir(&prefix, &name)
        })();
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        link: &Path,
        reply: ReplyEntry,
    ) {
        let mut state = self.state.write().unwrap();
        let result = (|| -> Result<fuser::FileAttr> {
            let prefix = self.components_of(parent)?;
            let name = tagpath::component(name)?;
            let target = link
                .to_str()
                .ok_or_else(|| TagError::IllegalName("target not valid UTF-8".into()))?;
            state.plan_symlink(&prefix, &name, target)?;
            let mut comps = prefix;
            comps.push(name);
            self.attr_for(&state, &comps)
        })();
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let mut state = self.state.write().unwrap();
        let result = (|| -> Result<()> {
            let src_prefix = self.components_of(parent)?;
            let dst_prefix = self.components_of(newparent)?;
            let src_name = tagpath::component(name)?;
            let dst_name = tagpath::component(newname)?;
            state.plan_rename(&src_prefix, &src_name, &dst_prefix, &dst_name)
        })();
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(TagError::Unsupported("hard links").errno());
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let state = self.state.read().unwrap();
        let result = (|| -> Result<u64> {
            let comps = self.components_of(ino)?;
            let Node::File(id) = query::resolve(&state.index, &comps)? else {
                return Err(TagError::Invalid("cannot open a tag directory".into()));
            };
            state.handles.lock().unwrap().acquire(id);
            Ok(id as u64)
        })();
        match result {
            Ok(fh) => reply.opened(fh, flags as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let mut state = self.state.write().unwrap();
        let result = (|| -> Result<(fuser::FileAttr, u64)> {
            let prefix = self.components_of(parent)?;
            let name = tagpath::component(name)?;
            let id = state.plan_create(&prefix, &name, mode & 0o7777)?;
            state.handles.lock().unwrap().acquire(id);
            let mut comps = prefix;
            comps.push(name);
            let attr = self.attr_for(&state, &comps)?;
            Ok((attr, id as u64))
        })();
        match result {
            Ok((attr, fh)) => reply.created(&TTL, &attr, 0, fh, flags as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        // Content I/O is keyed by the handle, so reads keep working after an
        // unlink-while-open.
        let state = self.state.read().unwrap();
        match state.content.read_at(fh as FileId, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let state = self.state.write().unwrap();
        match state.content.write_at(fh as FileId, offset as u64, data) {
            Ok(bytes) => reply.written(bytes),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Positional writes go straight to the object file; nothing buffered.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let state = self.state.read().unwrap();
        let id = fh as FileId;
        let delete_now = state.handles.lock().unwrap().release(id);
        if delete_now {
            if let Err(e) = state.content.remove(id) {
                tracing::warn!("[TagDrive] deferred delete of object {} failed: {}", id, e);
            }
        }
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let state = self.state.read().unwrap();
        let comps = match self.components_of(ino) {
            Ok(c) => c,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        match query::resolve(&state.index, &comps) {
            Ok(Node::Dir) => {}
            Ok(Node::File(_)) => {
                reply.error(libc::ENOTDIR);
                return;
            }
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        }

        let parent_ino = match comps.split_last() {
            Some((_, parent)) => self.inodes.assign(parent),
            None => ROOT_INO,
        };
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];

        for item in project::listing(&state.index, &comps) {
            let mut child = comps.clone();
            child.push(item.name.clone());
            let child_ino = self.inodes.assign(&child);
            let kind = match item.kind {
                EntryKind::Dir => FileType::Directory,
                EntryKind::File => FileType::RegularFile,
                EntryKind::Symlink => FileType::Symlink,
            };
            let shown = if item.hidden {
                format!(".{}", item.name)
            } else {
                item.name
            };
            entries.push((child_ino, kind, shown));
        }

        for (i, (ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let state = self.state.read().unwrap();
        let files = state.index.file_count() as u64;
        reply.statfs(1 << 20, 1 << 19, 1 << 19, files, 1 << 20, 4096, 255, 4096);
    }

    fn access(&mut self, _req: &Request, ino: u64, _mask: i32, reply: ReplyEmpty) {
        // Fixed mount-wide policy: anything that resolves is accessible.
        let state = self.state.read().unwrap();
        let result = self
            .components_of(ino)
            .and_then(|comps| query::resolve(&state.index, &comps).map(|_| ()));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}
