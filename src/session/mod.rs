//! The three roles of a transfer session and their shared plumbing.
//!
//! The receiver and the generator running inside it share one outbound
//! channel drained by a single writer task, so all frames to the sender are
//! serialised without sharing the endpoint itself.

pub mod generator;
pub mod receiver;
pub mod sender;

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cli::Config;
use crate::protocol::{AttrFlags, Framing, Message};

/// Outbound frames queued between the receiver/generator and the writer
/// task. Bounded for backpressure.
pub const OUTBOUND_CHANNEL_SIZE: usize = 64;

pub type OutboundSender = mpsc::Sender<Message>;
pub type OutboundReceiver = mpsc::Receiver<Message>;

pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(OUTBOUND_CHANNEL_SIZE)
}

/// Role-facing view of the configuration: plain filesystem paths with the
/// transfer flags, detached from argv and path schemes.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Source roots as plain paths (schemes stripped); trailing slashes are
    /// significant for layout.
    pub sources: Vec<String>,
    /// Destination root as a plain path.
    pub dest: String,
    pub recursive: bool,
    pub dirs: bool,
    pub perms: bool,
    pub times: bool,
    pub hard_links: bool,
    pub checksum: bool,
    pub ignore_times: bool,
    pub size_only: bool,
    pub update: bool,
    pub ignore_existing: bool,
    pub existing: bool,
    pub delete: bool,
    pub force: bool,
    pub whole_file: bool,
    pub compress: bool,
    pub compress_level: u32,
    pub timeout: u64,
}

impl SessionConfig {
    /// Derive the session view from parsed options, with the paths the
    /// local process actually touches.
    pub fn new(config: &Config, sources: Vec<String>, dest: String) -> Arc<SessionConfig> {
        Arc::new(SessionConfig {
            sources,
            dest,
            recursive: config.recursive,
            dirs: config.dirs,
            perms: config.perms,
            times: config.times,
            hard_links: config.hard_links,
            checksum: config.checksum,
            ignore_times: config.ignore_times,
            size_only: config.size_only,
            update: config.update,
            ignore_existing: config.ignore_existing,
            existing: config.existing,
            delete: config.delete,
            force: config.force,
            whole_file: config.whole_file,
            compress: config.compress,
            compress_level: config.compress_level,
            timeout: config.timeout,
        })
    }

    /// Attribute bitset requested for file lists. Size and times are always
    /// carried; the diff needs them.
    pub fn attrs(&self) -> AttrFlags {
        let mut attrs = AttrFlags::FILE_SIZE | AttrFlags::FILE_TIMES;
        if self.perms {
            attrs |= AttrFlags::PERMISSIONS;
        }
        if self.hard_links {
            attrs |= AttrFlags::HARD_LINKS;
        }
        if self.checksum {
            attrs |= AttrFlags::CHECKSUM;
        }
        attrs
    }

    pub fn framing(&self) -> Framing {
        Framing {
            compress: self.compress,
            level: self.compress_level,
        }
    }
}

/// Counters for the end-of-transfer summary.
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    pub files_created: u64,
    pub files_updated: u64,
    pub files_touched: u64,
    pub files_deleted: u64,
    pub dirs_created: u64,
    pub links_created: u64,
    pub files_skipped: u64,
    pub bytes_written: u64,
}

impl SyncStats {
    pub fn summary(&self) -> String {
        format!(
            "created {} updated {} touched {} deleted {} ({} bytes written)",
            self.files_created,
            self.files_updated,
            self.files_touched,
            self.files_deleted,
            self.bytes_written
        )
    }
}
