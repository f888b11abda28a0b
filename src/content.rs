//! Content I/O: file bytes and symlink read translation.
//!
//! Bytes live in one flat object directory keyed by `FileId`, so retagging
//! is pure catalog work and never moves data. Reads and writes are
//! positional; the kernel supplies offsets and no cursor state lives here.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::engine::index::FileId;
use crate::error::Result;

pub struct ContentStore {
    root: PathBuf,
}

/// Metadata of an object file, with a caller-supplied fallback for
/// timestamps the platform cannot produce.
#[derive(Debug, Clone, Copy)]
pub struct ObjectStat {
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl ContentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, id: FileId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Reserve an empty object for a freshly created file.
    pub fn create(&self, id: FileId) -> Result<()> {
        File::create(self.object_path(id))?;
        Ok(())
    }

    pub fn read_at(&self, id: FileId, offset: u64, size: u32) -> Result<Vec<u8>> {
        let file = File::open(self.object_path(id))?;
        let mut buffer = vec![0u8; size as usize];
        let bytes = file.read_at(&mut buffer, offset)?;
        buffer.truncate(bytes);
        Ok(buffer)
    }

    pub fn write_at(&self, id: FileId, offset: u64, data: &[u8]) -> Result<u32> {
        let file = OpenOptions::new().write(true).open(self.object_path(id))?;
        let bytes = file.write_at(data, offset)?;
        Ok(bytes as u32)
    }

    pub fn truncate(&self, id: FileId, size: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(self.object_path(id))?;
        file.set_len(size)?;
        Ok(())
    }

    pub fn set_mtime(&self, id: FileId, mtime: SystemTime) -> Result<()> {
        let file = OpenOptions::new().write(true).open(self.object_path(id))?;
        file.set_modified(mtime)?;
        Ok(())
    }

    pub fn stat(&self, id: FileId, fallback: SystemTime) -> Result<ObjectStat> {
        let meta = std::fs::metadata(self.object_path(id))?;
        let mut stat = ObjectStat {
            size: meta.len(),
            atime: fallback,
            mtime: fallback,
            ctime: fallback,
        };
        if let Ok(a) = meta.accessed() {
            stat.atime = a;
        }
        if let Ok(m) = meta.modified() {
            stat.mtime = m;
            stat.ctime = m;
        }
        Ok(stat)
    }

    pub fn remove(&self, id: FileId) -> Result<()> {
        std::fs::remove_file(self.object_path(id))?;
        Ok(())
    }

    pub fn exists(&self, id: FileId) -> bool {
        self.object_path(id).exists()
    }
}

/// Rewrite a symlink target for a reader `depth` tags below the mount root.
///
/// Relative targets are defined as if the mount root were the link's parent,
/// so each level of tag nesting costs one ascent. Absolute targets pass
/// through untouched.
pub fn translate_target(target: &str, depth: usize) -> String {
    if target.starts_with('/') {
        return target.to_string();
    }
    let mut out = String::with_capacity(3 * depth + target.len());
    for _ in 0..depth {
        out.push_str("../");
    }
    out.push_str(target);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_targets_gain_one_ascent_per_tag() {
        assert_eq!(translate_target("target", 0), "target");
        assert_eq!(translate_target("target", 1), "../target");
        assert_eq!(translate_target("a/b", 3), "../../../a/b");
    }

    #[test]
    fn absolute_targets_pass_through() {
        assert_eq!(translate_target("/etc/hosts", 4), "/etc/hosts");
    }
}
