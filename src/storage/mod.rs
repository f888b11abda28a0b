//! Storage module - sqlite catalog and the object directory layout.

mod store;

pub use store::{
    delete_file, delete_marker, insert_file, insert_marker, rename_marker, update_mode,
    update_name, update_owner, update_tags, Store,
};
