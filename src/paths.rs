//! Local path to remote path conversion

use std::path::Path;

/// Convert a local path to its platform-independent remote form.
///
/// Backslashes become forward slashes and a leading drive letter (`C:`) is
/// dropped, so `C:\data\a.txt` and `/data/a.txt` map to the same key.
pub fn to_remote(path: &Path) -> String {
    normalize_str(&path.to_string_lossy())
}

pub fn normalize_str(raw: &str) -> String {
    let s = raw.replace('\\', "/");
    let bytes = s.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return s[2..].to_string();
    }
    s
}

/// Parent of a remote path, or `None` for the root and bare names.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        return Some("/");
    }
    Some(&trimmed[..idx])
}

/// Whether a remote directory needs no creation (`.`, `/`, empty, `X:/`).
pub fn is_remote_root(dir: &str) -> bool {
    if dir.is_empty() || dir == "." || dir == "/" {
        return true;
    }
    let bytes = dir.as_bytes();
    bytes.len() <= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes.get(1) == Some(&b':')
        && bytes.get(2).map_or(true, |b| *b == b'/' || *b == b'\\')
}

/// Join a configured prefix and a remote path with exactly one slash.
pub fn join_remote(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if prefix.is_empty() {
        format!("/{path}")
    } else if prefix.starts_with('/') {
        format!("{prefix}/{path}")
    } else {
        format!("/{prefix}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_drive_and_flips_separators() {
        assert_eq!(normalize_str(r"C:\Users\me\a.txt"), "/Users/me/a.txt");
        assert_eq!(normalize_str("/home/me/a.txt"), "/home/me/a.txt");
        assert_eq!(normalize_str(r"d:\x"), "/x");
    }

    #[test]
    fn parent_walks_up_to_root() {
        assert_eq!(remote_parent("/a/b/c.txt"), Some("/a/b"));
        assert_eq!(remote_parent("/a"), Some("/"));
        assert_eq!(remote_parent("pack.0.x.tar"), None);
    }

    #[test]
    fn roots_are_recognized() {
        assert!(is_remote_root("/"));
        assert!(is_remote_root("."));
        assert!(is_remote_root("C:/"));
        assert!(is_remote_root(r"C:\"));
        assert!(!is_remote_root("/data"));
    }

    #[test]
    fn join_handles_prefix_slashes() {
        assert_eq!(join_remote("", "/a/b"), "/a/b");
        assert_eq!(join_remote("/backup/", "/a/b"), "/backup/a/b");
        assert_eq!(join_remote("backup", "pack.1.x.tar"), "/backup/pack.1.x.tar");
    }
}
