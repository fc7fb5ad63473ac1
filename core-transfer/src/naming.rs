//! Destination key construction and collision avoidance.
//!
//! A copy never overwrites: when the target key is taken, the name gets a
//! ` copy`, ` copy 2`, ` copy 3`, ... suffix in front of the extension until a
//! free key is found. The check runs against a listing taken before the
//! transfer starts and is not atomic with respect to other writers.

use crate::{Result, TransferError};
use std::collections::HashSet;

/// Upper bound on suffix attempts before giving up.
pub const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Last path segment of an object key, without the folder slash.
pub fn object_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Normalize a destination prefix: no leading slash, one trailing slash,
/// empty for the bucket root.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Build the key for `name` under an already normalized `prefix`.
pub fn join_key(prefix: &str, name: &str, is_folder: bool) -> String {
    if is_folder {
        format!("{}{}/", prefix, name)
    } else {
        format!("{}{}", prefix, name)
    }
}

/// Split `report.final.pdf` into (`report.final`, `.pdf`). Dotfiles and
/// names without a dot have no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}

/// Name for the given attempt: 0 is the original, 1 is ` copy`, n is ` copy n`.
/// Folder names are never split at a dot.
pub fn candidate_name(name: &str, attempt: usize, is_folder: bool) -> String {
    if attempt == 0 {
        return name.to_string();
    }

    let (base, extension) = if is_folder {
        (name, "")
    } else {
        split_extension(name)
    };

    if attempt == 1 {
        format!("{} copy{}", base, extension)
    } else {
        format!("{} copy {}{}", base, attempt, extension)
    }
}

/// Whether `key` is taken in `existing`. A folder is taken if its marker or
/// any object under it exists.
pub fn is_taken(existing: &HashSet<String>, key: &str, is_folder: bool) -> bool {
    if existing.contains(key) {
        return true;
    }
    is_folder && existing.iter().any(|other| other.starts_with(key))
}

/// Resolve a collision-free destination key for `name` under `prefix`.
///
/// # Errors
///
/// Returns [`TransferError::NoFreeName`] after [`MAX_NAME_ATTEMPTS`] taken names.
pub fn resolve_free_key(
    existing: &HashSet<String>,
    prefix: &str,
    name: &str,
    is_folder: bool,
) -> Result<String> {
    (0..MAX_NAME_ATTEMPTS)
        .map(|attempt| join_key(prefix, &candidate_name(name, attempt, is_folder), is_folder))
        .find(|key| !is_taken(existing, key, is_folder))
        .ok_or_else(|| TransferError::NoFreeName {
            key: join_key(prefix, name, is_folder),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_object_name() {
        assert_eq!(object_name("docs/2024/report.pdf"), "report.pdf");
        assert_eq!(object_name("docs/2024/"), "2024");
        assert_eq!(object_name("top.txt"), "top.txt");
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix("backups"), "backups/");
        assert_eq!(normalize_prefix("/backups/2024/"), "backups/2024/");
    }

    #[test]
    fn test_candidate_names() {
        assert_eq!(candidate_name("report.pdf", 0, false), "report.pdf");
        assert_eq!(candidate_name("report.pdf", 1, false), "report copy.pdf");
        assert_eq!(candidate_name("report.pdf", 2, false), "report copy 2.pdf");
        assert_eq!(candidate_name("archive.tar.gz", 1, false), "archive.tar copy.gz");
        assert_eq!(candidate_name("README", 3, false), "README copy 3");
        assert_eq!(candidate_name(".env", 1, false), ".env copy");
        assert_eq!(candidate_name("v1.2", 1, true), "v1.2 copy");
    }

    #[test]
    fn test_free_key_walks_suffixes() {
        let existing = keys(&["out/report.pdf"]);
        assert_eq!(
            resolve_free_key(&existing, "out/", "report.pdf", false).unwrap(),
            "out/report copy.pdf"
        );

        let existing = keys(&["out/report.pdf", "out/report copy.pdf"]);
        assert_eq!(
            resolve_free_key(&existing, "out/", "report.pdf", false).unwrap(),
            "out/report copy 2.pdf"
        );
    }

    #[test]
    fn test_free_key_unchanged_when_free() {
        let existing = keys(&["out/other.pdf"]);
        assert_eq!(
            resolve_free_key(&existing, "out/", "report.pdf", false).unwrap(),
            "out/report.pdf"
        );
    }

    #[test]
    fn test_folder_without_marker_is_taken() {
        let existing = keys(&["photos/a.jpg"]);
        assert_eq!(
            resolve_free_key(&existing, "", "photos", true).unwrap(),
            "photos copy/"
        );
    }

    #[test]
    fn test_gives_up_after_bound() {
        let mut existing = HashSet::new();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            existing.insert(candidate_name("x.bin", attempt, false));
        }
        assert!(matches!(
            resolve_free_key(&existing, "", "x.bin", false),
            Err(TransferError::NoFreeName { .. })
        ));
    }
}
