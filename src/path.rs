//! Path schemes and target resolution.
//!
//! Argument paths come in three shapes: `host::path` (daemon),
//! `[user@]host:path` (remote shell) and plain local paths. Entry paths on
//! the wire are relative to their source root; [`resolve_target`] maps them
//! onto the destination tree and [`resolve_source`] mirrors the same rules
//! on the sender side.

use std::path::{Path, PathBuf};

/// A parsed source or destination argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPath {
    Local { path: String },
    Ssh { user: Option<String>, host: String, path: String },
    Daemon { host: String, path: String },
}

impl SyncPath {
    /// Parse one argument. `host::path` wins over `host:path`; anything
    /// without a colon before the first slash is local.
    pub fn parse(arg: &str) -> SyncPath {
        if let Some((host, path)) = arg.split_once("::") {
            return SyncPath::Daemon {
                host: host.to_string(),
                path: path.to_string(),
            };
        }
        if let Some((head, path)) = arg.split_once(':') {
            // `./weird:name` is a local file, not a host.
            if !head.contains('/') {
                let (user, host) = match head.split_once('@') {
                    Some((user, host)) => (Some(user.to_string()), host.to_string()),
                    None => (None, head.to_string()),
                };
                return SyncPath::Ssh {
                    user,
                    host,
                    path: path.to_string(),
                };
            }
        }
        SyncPath::Local {
            path: arg.to_string(),
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, SyncPath::Local { .. })
    }

    pub fn path(&self) -> &str {
        match self {
            SyncPath::Local { path }
            | SyncPath::Ssh { path, .. }
            | SyncPath::Daemon { path, .. } => path,
        }
    }
}

/// Last component of a path, as a string. Trailing slashes are ignored.
pub fn basename(p: &str) -> &str {
    let trimmed = p.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, base)) => base,
        None => trimmed,
    }
}

/// Whether a source root transfers its contents (trailing slash) rather
/// than the root entry itself.
pub fn transfers_contents(source_root: &str) -> bool {
    source_root.ends_with('/')
}

/// Map a wire entry path onto the destination tree.
///
/// An empty path denotes the source root itself; a source root without a
/// trailing slash contributes its basename to the destination layout.
pub fn resolve_target(dest_root: &str, sources: &[String], source_index: usize, rel: &str) -> PathBuf {
    let source_root = sources
        .get(source_index)
        .map(String::as_str)
        .unwrap_or("");
    let dest = Path::new(dest_root);

    let rel = rel.trim_end_matches('/');

    if transfers_contents(source_root) {
        if rel.is_empty() {
            return dest.to_path_buf();
        }
        return dest.join(rel);
    }

    let base = basename(source_root);
    if rel.is_empty() {
        if dest_root.ends_with('/') || base.is_empty() {
            return dest.join(base);
        }
        return dest.to_path_buf();
    }
    dest.join(base).join(rel)
}

/// Map a wire entry path onto the source tree (mirror of [`resolve_target`]).
pub fn resolve_source(sources: &[String], source_index: usize, rel: &str) -> PathBuf {
    let source_root = sources
        .get(source_index)
        .map(String::as_str)
        .unwrap_or("");
    let rel = rel.trim_end_matches('/');
    if rel.is_empty() {
        PathBuf::from(source_root)
    } else {
        Path::new(source_root).join(rel)
    }
}

/// Destination-relative name for an entry, used when diffing the file lists
/// and when naming deletions. Mirrors [`resolve_target`] without the root.
pub fn dest_relative(sources: &[String], source_index: usize, rel: &str) -> String {
    let source_root = sources
        .get(source_index)
        .map(String::as_str)
        .unwrap_or("");
    let rel = rel.trim_end_matches('/');
    if transfers_contents(source_root) {
        return rel.to_string();
    }
    let base = basename(source_root);
    if rel.is_empty() {
        base.to_string()
    } else if base.is_empty() {
        rel.to_string()
    } else {
        format!("{base}/{rel}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_daemon_scheme() {
        assert_eq!(
            SyncPath::parse("backup-host::srv/data"),
            SyncPath::Daemon {
                host: "backup-host".into(),
                path: "srv/data".into()
            }
        );
    }

    #[test]
    fn parses_ssh_scheme_with_user() {
        assert_eq!(
            SyncPath::parse("alice@example.com:/home/alice"),
            SyncPath::Ssh {
                user: Some("alice".into()),
                host: "example.com".into(),
                path: "/home/alice".into()
            }
        );
        assert_eq!(
            SyncPath::parse("example.com:data"),
            SyncPath::Ssh {
                user: None,
                host: "example.com".into(),
                path: "data".into()
            }
        );
    }

    #[test]
    fn parses_local_paths() {
        assert!(!SyncPath::parse("/tmp/data").is_remote());
        assert!(!SyncPath::parse("relative/dir").is_remote());
        // A colon after a slash is part of a filename.
        assert!(!SyncPath::parse("./odd:name").is_remote());
    }

    #[test]
    fn root_entry_without_trailing_slash_lands_under_basename() {
        let sources = vec!["/data/photos".to_string()];
        assert_eq!(
            resolve_target("/backup/", &sources, 0, ""),
            PathBuf::from("/backup/photos")
        );
        assert_eq!(
            resolve_target("/backup/", &sources, 0, "2024/a.jpg"),
            PathBuf::from("/backup/photos/2024/a.jpg")
        );
    }

    #[test]
    fn trailing_slash_transfers_contents() {
        let sources = vec!["/data/photos/".to_string()];
        assert_eq!(
            resolve_target("/backup", &sources, 0, "2024/a.jpg"),
            PathBuf::from("/backup/2024/a.jpg")
        );
        assert_eq!(
            resolve_target("/backup", &sources, 0, ""),
            PathBuf::from("/backup")
        );
    }

    #[test]
    fn source_resolution_mirrors_target() {
        let sources = vec!["/data/photos".to_string()];
        assert_eq!(
            resolve_source(&sources, 0, "2024/a.jpg"),
            PathBuf::from("/data/photos/2024/a.jpg")
        );
        assert_eq!(resolve_source(&sources, 0, ""), PathBuf::from("/data/photos"));
    }

    #[test]
    fn dest_relative_names() {
        let plain = vec!["/data/photos".to_string()];
        assert_eq!(dest_relative(&plain, 0, ""), "photos");
        assert_eq!(dest_relative(&plain, 0, "a/b"), "photos/a/b");
        let slashed = vec!["/data/photos/".to_string()];
        assert_eq!(dest_relative(&slashed, 0, "a/b"), "a/b");
    }

    #[test]
    fn directory_marker_is_stripped() {
        let sources = vec!["/data/".to_string()];
        assert_eq!(
            resolve_target("/backup", &sources, 0, "sub/"),
            PathBuf::from("/backup/sub")
        );
    }
}
