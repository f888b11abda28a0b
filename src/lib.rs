//! tagfs: a tag-projection filesystem.
//!
//! Files carry tags; every path below the mount is read as an ordered list
//! of tags, and directories are projections of the tag graph computed on the
//! fly. The crate splits into:
//! - `drive` (FUSE loop - thin dispatcher, no semantics)
//! - `engine` (tag index, query matching, visibility projection)
//! - `planner` (mutations as store transactions)
//! - `storage` + `content` (sqlite catalog and the object directory)

pub mod content;
pub mod core;
pub mod drive;
pub mod engine;
pub mod error;
pub mod planner;
pub mod state;
pub mod storage;

pub use drive::TagDrive;
pub use engine::index::{FileEntry, FileId};
pub use error::{Result, TagError};
pub use state::{MountState, SharedState};
