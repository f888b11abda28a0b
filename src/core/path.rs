//! Path components and the name grammar.
//!
//! Every path below the mount is an ordered list of tags, optionally ending
//! in a file name. Directories never exist on their own, so parsing is pure
//! string work against the grammar; resolution happens in the engine.

use std::ffi::OsStr;

use crate::error::{Result, TagError};

/// Rename destination that deletes an empty tag. SMB clients and some file
/// managers cannot issue rmdir against a projected directory, so dragging a
/// tag onto this name is the escape hatch.
pub const DELETE_SENTINEL: &str = "..deleteme";

/// Normalize one path component as handed over by the kernel.
///
/// The leading dot is a presentation artifact (hidden entries are fully
/// accessible by either name), so a single one is stripped before lookup.
/// The delete sentinel is the one literal exception.
pub fn component(name: &OsStr) -> Result<String> {
    let name = name
        .to_str()
        .ok_or_else(|| TagError::IllegalName("not valid UTF-8".into()))?;
    Ok(strip_presentation_dot(name).to_string())
}

pub fn strip_presentation_dot(name: &str) -> &str {
    if name == DELETE_SENTINEL {
        return name;
    }
    name.strip_prefix('.').unwrap_or(name)
}

/// Name grammar, enforced on create/mkdir/rename destinations.
///
/// Names are UTF-8 by the time they reach here; they must be non-empty, free
/// of `/` and NUL, not `.` or `..`, and must not begin or end with a dot.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(TagError::IllegalName(name.to_string()));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(TagError::IllegalName(name.to_string()));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(TagError::IllegalName(name.to_string()));
    }
    Ok(())
}

/// Parse an absolute path rooted at the mount into ordered components.
/// Empty segments and trailing slashes are discarded.
pub fn parse(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| strip_presentation_dot(s).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_and_strips() {
        assert_eq!(parse("/"), Vec::<String>::new());
        assert_eq!(parse("/a/b/"), vec!["a", "b"]);
        assert_eq!(parse("//a///b"), vec!["a", "b"]);
        assert_eq!(parse("/.hidden/file"), vec!["hidden", "file"]);
    }

    #[test]
    fn sentinel_survives_normalization() {
        assert_eq!(strip_presentation_dot("..deleteme"), "..deleteme");
        assert_eq!(strip_presentation_dot(".name"), "name");
        assert_eq!(strip_presentation_dot("..name"), ".name");
    }

    #[test]
    fn grammar_rejects_dotted_and_reserved() {
        assert!(validate_name("ticket.pdf").is_ok());
        assert!(validate_name("peru2018").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("trailing.").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("nul\0byte").is_err());
        // Sentinel is only legal as a rename destination, which is checked
        // before the grammar runs.
        assert!(validate_name(DELETE_SENTINEL).is_err());
    }
}
