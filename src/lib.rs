//! rsyn: an rsync-compatible file-tree synchroniser.
//!
//! Mirrors source trees onto a destination with minimal bytes on the wire:
//! the peers exchange a compact file list, then per changed file only the
//! byte ranges that differ, found by a rolling-checksum block match.

pub mod checksum;
pub mod cli;
pub mod daemon;
pub mod delta;
pub mod error;
pub mod filelist;
pub mod path;
pub mod protocol;
pub mod session;
pub mod transfer;

pub use cli::{Cli, Config};
pub use error::{Result, SyncError};
