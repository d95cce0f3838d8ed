//! File metadata carried on the wire.
//!
//! The attribute bitset selects which optional fields a peer populates;
//! unknown map keys are ignored on decode so newer peers can add fields.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;

bitflags! {
    /// Which optional attributes the file list and data replies carry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttrFlags: u32 {
        const HARD_LINKS  = 1 << 0;
        const PERMISSIONS = 1 << 1;
        const FILE_SIZE   = 1 << 2;
        const FILE_TIMES  = 1 << 3;
        const CHECKSUM    = 1 << 4;
    }
}

/// Closed record of optional per-file attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Which configured source root the file came from.
    #[serde(default)]
    pub source: u32,

    /// Other tree-relative paths hard-linked to the same inode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,

    /// Unix permission bits (low 9 bits of the mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atime: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctime: Option<i64>,

    /// Whole-file weak checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u32>,
}

impl FileMeta {
    /// Populate the fields selected by `attrs` from filesystem metadata.
    /// Link names and the checksum are filled by the caller, which knows the
    /// tree layout.
    pub fn from_metadata(md: &Metadata, attrs: AttrFlags) -> FileMeta {
        let mut meta = FileMeta::default();
        if attrs.contains(AttrFlags::PERMISSIONS) {
            #[cfg(unix)]
            {
                use std::os::unix::fs::MetadataExt;
                meta.mode = Some(md.mode() & 0o777);
            }
        }
        if attrs.contains(AttrFlags::FILE_SIZE) && md.is_file() {
            meta.size = Some(md.len());
        }
        if attrs.contains(AttrFlags::FILE_TIMES) {
            #[cfg(unix)]
            {
                use std::os::unix::fs::MetadataExt;
                meta.atime = Some(md.atime());
                meta.mtime = Some(md.mtime());
                meta.ctime = Some(md.ctime());
            }
        }
        meta
    }
}
