//! File-list construction and diffing.
//!
//! The builder walks a set of source roots into [`FileEntry`] records with
//! the attributes a peer asked for. The differ classifies source entries
//! against destination entries by destination-relative path: MISSING drives
//! whole-file requests, MODIFIED drives delta requests, EXTRA drives
//! deletions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

use crate::checksum::file_checksum;
use crate::path::{dest_relative, transfers_contents};
use crate::protocol::info::{AttrFlags, FileMeta};
use crate::protocol::message::ListOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Directory,
}

/// One record per file or directory under a source root. `path` is relative
/// to the root; the empty string denotes the root itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub kind: FileKind,
    pub source: u32,
    pub path: String,
    pub meta: FileMeta,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// Walk the source roots into a sorted file list.
///
/// A trailing slash on a root means "walk its contents"; without one the
/// root entry itself is listed first (and, when recursive, its contents
/// follow). Unreadable entries are logged and skipped.
pub fn build_file_list(sources: &[String], opts: &ListOptions) -> io::Result<Vec<FileEntry>> {
    let attrs = AttrFlags::from_bits_truncate(opts.attrs);
    let mut entries = Vec::new();
    // (device, inode) -> indices of entries sharing it, for hard links.
    let mut inodes: HashMap<(u64, u64), Vec<usize>> = HashMap::new();

    for (idx, source) in sources.iter().enumerate() {
        let root = Path::new(source.trim_end_matches('/'));
        let md = std::fs::metadata(root)?;
        let contents_only = transfers_contents(source);

        if !contents_only {
            push_entry(
                &mut entries,
                &mut inodes,
                idx as u32,
                String::new(),
                root,
                &md,
                attrs,
            );
        }

        if md.is_dir() && (opts.recursive || opts.dirs) {
            let walker = WalkDir::new(root)
                .follow_links(true)
                .min_depth(1)
                .max_depth(if opts.recursive { usize::MAX } else { 1 })
                .sort_by_file_name();
            for item in walker {
                let item = match item {
                    Ok(item) => item,
                    Err(err) => {
                        tracing::warn!("skipping unreadable entry: {err}");
                        continue;
                    }
                };
                let rel = item
                    .path()
                    .strip_prefix(root)
                    .unwrap_or(item.path())
                    .to_string_lossy()
                    .into_owned();
                let md = match item.metadata() {
                    Ok(md) => md,
                    Err(err) => {
                        tracing::warn!("skipping {}: {err}", item.path().display());
                        continue;
                    }
                };
                push_entry(&mut entries, &mut inodes, idx as u32, rel, item.path(), &md, attrs);
            }
        }
    }

    if attrs.contains(AttrFlags::HARD_LINKS) {
        link_peers(&mut entries, &inodes);
    }

    entries.sort_by(|a, b| (a.source, &a.path).cmp(&(b.source, &b.path)));
    Ok(entries)
}

fn push_entry(
    entries: &mut Vec<FileEntry>,
    inodes: &mut HashMap<(u64, u64), Vec<usize>>,
    source: u32,
    rel: String,
    full: &Path,
    md: &std::fs::Metadata,
    attrs: AttrFlags,
) {
    let kind = if md.is_dir() {
        FileKind::Directory
    } else {
        FileKind::File
    };
    let mut meta = FileMeta::from_metadata(md, attrs);
    if kind == FileKind::File && attrs.contains(AttrFlags::CHECKSUM) {
        match file_checksum(full) {
            Ok(sum) => meta.checksum = Some(sum),
            Err(err) => tracing::warn!("checksum of {} failed: {err}", full.display()),
        }
    }

    #[cfg(unix)]
    if kind == FileKind::File && attrs.contains(AttrFlags::HARD_LINKS) {
        use std::os::unix::fs::MetadataExt;
        if md.nlink() > 1 {
            inodes.entry((md.dev(), md.ino())).or_default().push(entries.len());
        }
    }

    entries.push(FileEntry {
        kind,
        source,
        path: rel,
        meta,
    });
}

/// Record, on each multiply-linked entry, the peer paths sharing its inode.
fn link_peers(entries: &mut [FileEntry], inodes: &HashMap<(u64, u64), Vec<usize>>) {
    for group in inodes.values() {
        if group.len() < 2 {
            continue;
        }
        for &i in group {
            let peers: Vec<String> = group
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| entries[j].path.clone())
                .collect();
            entries[i].meta.links = Some(peers);
        }
    }
}

/// Options steering the MODIFIED classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    pub checksum: bool,
    pub ignore_times: bool,
    pub size_only: bool,
}

/// A source file classified as modified, with its destination counterpart.
#[derive(Debug, Clone)]
pub struct ModifiedFile {
    pub entry: FileEntry,
    pub dest_rel: String,
    pub dest_mtime: Option<i64>,
}

#[derive(Debug, Default)]
pub struct DiffResult {
    pub missing: Vec<FileEntry>,
    pub modified: Vec<ModifiedFile>,
    /// Destination-relative paths present only on the destination.
    pub extra: Vec<String>,
}

/// Classify source entries against destination entries.
///
/// Destination entries are compared by their own relative paths; source
/// entries map through the §4.9 layout rules first. Directories are never
/// MODIFIED.
pub fn diff_lists(
    source_list: &[FileEntry],
    dest_list: &[FileEntry],
    sources: &[String],
    opts: &DiffOptions,
) -> DiffResult {
    let dest_by_path: HashMap<&str, &FileEntry> = dest_list
        .iter()
        .map(|e| (e.path.as_str(), e))
        .collect();

    let mut result = DiffResult::default();
    let mut seen = std::collections::HashSet::new();

    for entry in source_list {
        let mapped = dest_relative(sources, entry.source as usize, &entry.path);
        seen.insert(mapped.clone());

        let dest = match dest_by_path.get(mapped.as_str()) {
            None => {
                result.missing.push(entry.clone());
                continue;
            }
            Some(dest) => dest,
        };

        if entry.is_dir() {
            continue;
        }

        let modified = if opts.checksum {
            entry.meta.checksum != dest.meta.checksum
        } else if entry.meta.size != dest.meta.size {
            true
        } else if opts.size_only || opts.ignore_times {
            false
        } else {
            entry.meta.mtime != dest.meta.mtime
        };

        if modified {
            result.modified.push(ModifiedFile {
                entry: entry.clone(),
                dest_rel: mapped,
                dest_mtime: dest.meta.mtime,
            });
        }
    }

    for dest in dest_list {
        if !seen.contains(dest.path.as_str()) {
            result.extra.push(dest.path.clone());
        }
    }
    result.extra.sort();
    result
}

/// Render the file list for `--list-only`.
pub fn format_file_list(entries: &[FileEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let name = if entry.path.is_empty() { "." } else { &entry.path };
        match entry.kind {
            FileKind::Directory => out.push_str(&format!("d {name}\n")),
            FileKind::File => {
                let size = entry.meta.size.unwrap_or(0);
                out.push_str(&format!("- {size:>10} {name}\n"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn opts(attrs: AttrFlags, recursive: bool) -> ListOptions {
        ListOptions {
            attrs: attrs.bits(),
            recursive,
            dirs: true,
        }
    }

    #[test]
    fn walks_contents_with_trailing_slash() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "aa").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/b.txt"), "bbb").unwrap();

        let root = format!("{}/", tmp.path().display());
        let list = build_file_list(&[root], &opts(AttrFlags::FILE_SIZE, true)).unwrap();

        let paths: Vec<&str> = list.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub", "sub/b.txt"]);
        assert_eq!(list[0].meta.size, Some(2));
        assert!(list[1].is_dir());
        assert!(list[1].meta.size.is_none());
    }

    #[test]
    fn root_itself_listed_without_trailing_slash() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "aa").unwrap();

        let root = tmp.path().display().to_string();
        let list = build_file_list(&[root], &opts(AttrFlags::empty(), true)).unwrap();

        assert_eq!(list[0].path, "");
        assert!(list[0].is_dir());
        assert_eq!(list[1].path, "a.txt");
    }

    #[test]
    fn non_recursive_walks_one_level() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "aa").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/deep.txt"), "x").unwrap();

        let root = format!("{}/", tmp.path().display());
        let list = build_file_list(
            &[root],
            &ListOptions {
                attrs: 0,
                recursive: false,
                dirs: true,
            },
        )
        .unwrap();
        let paths: Vec<&str> = list.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub"]);
    }

    #[test]
    fn missing_root_errors() {
        assert!(build_file_list(
            &["/definitely/not/here".to_string()],
            &opts(AttrFlags::empty(), true)
        )
        .is_err());
    }

    #[cfg(unix)]
    #[test]
    fn hard_link_peers_are_recorded() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("orig"), "data").unwrap();
        fs::hard_link(tmp.path().join("orig"), tmp.path().join("copy")).unwrap();

        let root = format!("{}/", tmp.path().display());
        let list = build_file_list(&[root], &opts(AttrFlags::HARD_LINKS, true)).unwrap();

        let orig = list.iter().find(|e| e.path == "orig").unwrap();
        assert_eq!(orig.meta.links, Some(vec!["copy".to_string()]));
    }

    #[test]
    fn diff_classifies_missing_modified_extra() {
        let sources = vec!["/src/".to_string()];
        let meta = |size, mtime| FileMeta {
            size: Some(size),
            mtime: Some(mtime),
            ..Default::default()
        };
        let entry = |path: &str, size, mtime| FileEntry {
            kind: FileKind::File,
            source: 0,
            path: path.into(),
            meta: meta(size, mtime),
        };

        let src = vec![entry("same", 4, 10), entry("changed", 9, 10), entry("new", 1, 10)];
        let dst = vec![entry("same", 4, 10), entry("changed", 4, 10), entry("gone", 2, 10)];

        let diff = diff_lists(&src, &dst, &sources, &DiffOptions::default());
        assert_eq!(diff.missing.len(), 1);
        assert_eq!(diff.missing[0].path, "new");
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].entry.path, "changed");
        assert_eq!(diff.extra, vec!["gone".to_string()]);
    }

    #[test]
    fn mtime_ignored_when_requested() {
        let sources = vec!["/src/".to_string()];
        let entry = |mtime| FileEntry {
            kind: FileKind::File,
            source: 0,
            path: "f".into(),
            meta: FileMeta {
                size: Some(4),
                mtime: Some(mtime),
                ..Default::default()
            },
        };
        let src = vec![entry(10)];
        let dst = vec![entry(99)];

        let strict = diff_lists(&src, &dst, &sources, &DiffOptions::default());
        assert_eq!(strict.modified.len(), 1);

        let relaxed = diff_lists(
            &src,
            &dst,
            &sources,
            &DiffOptions {
                ignore_times: true,
                ..Default::default()
            },
        );
        assert!(relaxed.modified.is_empty());
    }

    #[test]
    fn checksum_mode_overrides_size_and_time() {
        let sources = vec!["/src/".to_string()];
        let entry = |sum| FileEntry {
            kind: FileKind::File,
            source: 0,
            path: "f".into(),
            meta: FileMeta {
                size: Some(4),
                mtime: Some(10),
                checksum: Some(sum),
                ..Default::default()
            },
        };
        let diff = diff_lists(
            &[entry(1)],
            &[entry(2)],
            &sources,
            &DiffOptions {
                checksum: true,
                ..Default::default()
            },
        );
        assert_eq!(diff.modified.len(), 1);
    }

    #[test]
    fn directories_are_never_modified() {
        let sources = vec!["/src/".to_string()];
        let dir = |mtime| FileEntry {
            kind: FileKind::Directory,
            source: 0,
            path: "d".into(),
            meta: FileMeta {
                mtime: Some(mtime),
                ..Default::default()
            },
        };
        let diff = diff_lists(&[dir(1)], &[dir(2)], &sources, &DiffOptions::default());
        assert!(diff.modified.is_empty());
    }

    #[test]
    fn basename_mapping_matches_destination_layout() {
        // Source without trailing slash: "photos/a.jpg" lives at
        // "photos/a.jpg" under the destination.
        let sources = vec!["/data/photos".to_string()];
        let src = vec![
            FileEntry {
                kind: FileKind::Directory,
                source: 0,
                path: "".into(),
                meta: FileMeta::default(),
            },
            FileEntry {
                kind: FileKind::File,
                source: 0,
                path: "a.jpg".into(),
                meta: FileMeta {
                    size: Some(1),
                    ..Default::default()
                },
            },
        ];
        let dst = vec![
            FileEntry {
                kind: FileKind::Directory,
                source: 0,
                path: "photos".into(),
                meta: FileMeta::default(),
            },
            FileEntry {
                kind: FileKind::File,
                source: 0,
                path: "photos/a.jpg".into(),
                meta: FileMeta {
                    size: Some(1),
                    ..Default::default()
                },
            },
        ];
        let diff = diff_lists(&src, &dst, &sources, &DiffOptions::default());
        assert!(diff.missing.is_empty());
        assert!(diff.extra.is_empty());
    }
}
