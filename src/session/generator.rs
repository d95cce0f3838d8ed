//! Generator: diffs the file lists and drives requests to the sender.
//!
//! Runs as its own task inside the receiver process. It never aborts the
//! session; per-file failures are logged and the work stream simply ends
//! with GENERATOR_FINISHED.

use std::path::Path;
use std::sync::Arc;

use crate::checksum::{block_count_for, BlockDigestSet};
use crate::filelist::{diff_lists, DiffOptions, FileEntry, ModifiedFile};
use crate::protocol::message::FileRequest;
use crate::protocol::Message;
use crate::session::{OutboundSender, SessionConfig};

pub struct Generator {
    config: Arc<SessionConfig>,
    outbound: OutboundSender,
}

impl Generator {
    pub fn new(config: Arc<SessionConfig>, outbound: OutboundSender) -> Generator {
        Generator { config, outbound }
    }

    /// Diff the lists and emit one request per file that needs work,
    /// deletions for extras, then GENERATOR_FINISHED.
    pub async fn run(self, source_list: Vec<FileEntry>, dest_list: Vec<FileEntry>) {
        if let Err(err) = self.generate(source_list, dest_list).await {
            tracing::warn!("generator stopped early: {err}");
        }
        if self.outbound.send(Message::GeneratorFinished).await.is_err() {
            tracing::debug!("outbound channel closed before generator finished");
        }
        tracing::debug!("generator finished");
    }

    async fn generate(
        &self,
        source_list: Vec<FileEntry>,
        dest_list: Vec<FileEntry>,
    ) -> anyhow::Result<()> {
        let diff_opts = DiffOptions {
            checksum: self.config.checksum,
            ignore_times: self.config.ignore_times,
            size_only: self.config.size_only,
        };
        let diff = diff_lists(&source_list, &dest_list, &self.config.sources, &diff_opts);
        tracing::debug!(
            missing = diff.missing.len(),
            modified = diff.modified.len(),
            extra = diff.extra.len(),
            "file lists classified"
        );

        if self.config.existing {
            tracing::debug!("skipping {} missing files (--existing)", diff.missing.len());
        } else {
            for entry in &diff.missing {
                self.ask_whole_file(entry).await?;
            }
        }

        if !diff.extra.is_empty() {
            if self.config.delete {
                self.outbound
                    .send(Message::DeleteFiles(diff.extra.clone()))
                    .await?;
            } else {
                tracing::debug!("ignoring {} extra destination files", diff.extra.len());
            }
        }

        for modified in &diff.modified {
            if self.skip_modified(modified) {
                continue;
            }
            self.ask_delta(modified).await?;
        }

        Ok(())
    }

    fn skip_modified(&self, modified: &ModifiedFile) -> bool {
        if self.config.ignore_existing {
            tracing::debug!("skipping existing {} (--ignore-existing)", modified.entry.path);
            return true;
        }
        if self.config.update {
            if let (Some(dest), Some(src)) = (modified.dest_mtime, modified.entry.meta.mtime) {
                if dest > src {
                    tracing::debug!("skipping {} (newer on receiver)", modified.entry.path);
                    return true;
                }
            }
        }
        false
    }

    async fn ask_whole_file(&self, entry: &FileEntry) -> anyhow::Result<()> {
        self.outbound
            .send(Message::AskFileData(FileRequest {
                path: entry.path.clone(),
                source: entry.source,
                digests: Vec::new(),
                total_len: -1,
            }))
            .await?;
        Ok(())
    }

    async fn ask_delta(&self, modified: &ModifiedFile) -> anyhow::Result<()> {
        let dest_path = Path::new(&self.config.dest).join(&modified.dest_rel);
        let entry = &modified.entry;

        let request = match self.digest_destination(&dest_path).await {
            Ok(digests) => FileRequest {
                path: entry.path.clone(),
                source: entry.source,
                total_len: digests.total_len as i64,
                digests: digests.blocks,
            },
            Err(err) => {
                // An unreadable destination copy falls back to a whole-file
                // request rather than losing the update.
                tracing::warn!("digest of {} failed: {err}", dest_path.display());
                FileRequest {
                    path: entry.path.clone(),
                    source: entry.source,
                    digests: Vec::new(),
                    total_len: -1,
                }
            }
        };
        self.outbound.send(Message::AskFileData(request)).await?;
        Ok(())
    }

    async fn digest_destination(&self, path: &Path) -> std::io::Result<BlockDigestSet> {
        let path = path.to_path_buf();
        let whole_file = self.config.whole_file;
        tokio::task::spawn_blocking(move || {
            let size = std::fs::metadata(&path)?.len();
            let blocks = block_count_for(size, whole_file);
            BlockDigestSet::from_file(&path, blocks)
        })
        .await
        .map_err(|e| std::io::Error::other(e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filelist::FileKind;
    use crate::protocol::FileMeta;
    use crate::session::outbound_channel;
    use std::fs;
    use tempfile::TempDir;

    fn test_config(dest: &str, delete: bool) -> Arc<SessionConfig> {
        Arc::new(SessionConfig {
            sources: vec!["/src/".to_string()],
            dest: dest.to_string(),
            recursive: true,
            dirs: true,
            perms: false,
            times: true,
            hard_links: false,
            checksum: false,
            ignore_times: false,
            size_only: false,
            update: false,
            ignore_existing: false,
            existing: false,
            delete,
            force: false,
            whole_file: false,
            compress: false,
            compress_level: 9,
            timeout: 0,
        })
    }

    fn file_entry(path: &str, size: u64, mtime: i64) -> FileEntry {
        FileEntry {
            kind: FileKind::File,
            source: 0,
            path: path.into(),
            meta: FileMeta {
                size: Some(size),
                mtime: Some(mtime),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn missing_file_requests_whole_file() {
        let tmp = TempDir::new().unwrap();
        let (tx, mut rx) = outbound_channel();
        let gen = Generator::new(test_config(&tmp.path().display().to_string(), false), tx);

        tokio::spawn(gen.run(vec![file_entry("new.txt", 5, 1)], vec![]));

        match rx.recv().await.unwrap() {
            Message::AskFileData(req) => {
                assert_eq!(req.path, "new.txt");
                assert!(req.digests.is_empty());
                assert_eq!(req.total_len, -1);
            }
            other => panic!("expected AskFileData, got {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap(), Message::GeneratorFinished);
    }

    #[tokio::test]
    async fn modified_file_requests_delta_with_digests() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f.txt"), b"old bytes here").unwrap();

        let (tx, mut rx) = outbound_channel();
        let gen = Generator::new(test_config(&tmp.path().display().to_string(), false), tx);

        let src = vec![file_entry("f.txt", 20, 2)];
        let dst = vec![file_entry("f.txt", 14, 1)];
        tokio::spawn(gen.run(src, dst));

        match rx.recv().await.unwrap() {
            Message::AskFileData(req) => {
                assert_eq!(req.path, "f.txt");
                assert_eq!(req.total_len, 14);
                assert!(!req.digests.is_empty());
            }
            other => panic!("expected AskFileData, got {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap(), Message::GeneratorFinished);
    }

    #[tokio::test]
    async fn extra_files_deleted_only_with_delete() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().display().to_string();

        let dst_list = vec![file_entry("stale.txt", 3, 1)];

        let (tx, mut rx) = outbound_channel();
        tokio::spawn(Generator::new(test_config(&dest, true), tx).run(vec![], dst_list.clone()));
        assert_eq!(
            rx.recv().await.unwrap(),
            Message::DeleteFiles(vec!["stale.txt".to_string()])
        );
        assert_eq!(rx.recv().await.unwrap(), Message::GeneratorFinished);

        let (tx, mut rx) = outbound_channel();
        tokio::spawn(Generator::new(test_config(&dest, false), tx).run(vec![], dst_list));
        assert_eq!(rx.recv().await.unwrap(), Message::GeneratorFinished);
    }

    #[tokio::test]
    async fn update_skips_newer_destination() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f.txt"), b"data").unwrap();
        let mut config = test_config(&tmp.path().display().to_string(), false);
        Arc::get_mut(&mut config).unwrap().update = true;

        let src = vec![file_entry("f.txt", 9, 5)];
        let dst = vec![file_entry("f.txt", 4, 10)];

        let (tx, mut rx) = outbound_channel();
        tokio::spawn(Generator::new(config, tx).run(src, dst));
        assert_eq!(rx.recv().await.unwrap(), Message::GeneratorFinished);
    }
}
