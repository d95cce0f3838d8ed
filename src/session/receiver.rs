//! Receiver: owns the destination tree and applies the delta stream.
//!
//! The read half is handled by this loop; every outbound frame (the initial
//! list request, the generator's asks and the final SERVER_FINISHED) funnels
//! through one writer task so the shared endpoint sees serialised writes.
//! Per-file failures are logged and skipped; only transport failures end the
//! session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, SeekFrom};

use crate::error::{Result, SyncError};
use crate::filelist::{build_file_list, FileEntry};
use crate::path::resolve_target;
use crate::protocol::message::{FileData, OffsetPayload};
use crate::protocol::{
    recv_message, send_message, FileMeta, Framing, ListOptions, Message, StreamTransport,
    Transport,
};
use crate::session::generator::Generator;
use crate::session::{outbound_channel, SessionConfig, SyncStats};

pub struct Receiver {
    config: Arc<SessionConfig>,
    framing: Framing,
    stats: SyncStats,
}

impl Receiver {
    pub fn new(config: Arc<SessionConfig>) -> Receiver {
        let framing = config.framing();
        Receiver {
            config,
            framing,
            stats: SyncStats::default(),
        }
    }

    /// Drive a whole session over the given endpoint halves.
    pub async fn run<R, W>(mut self, reader: R, writer: W) -> Result<SyncStats>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut inbound = StreamTransport::new(reader, tokio::io::sink(), self.config.timeout);

        let (tx, mut rx) = outbound_channel();
        let framing = self.framing;
        let timeout = self.config.timeout;
        let writer_task = tokio::spawn(async move {
            let mut outbound = StreamTransport::new(tokio::io::empty(), writer, timeout);
            while let Some(msg) = rx.recv().await {
                send_message(&mut outbound, &msg, &framing).await?;
            }
            outbound.close().await.ok();
            Ok::<(), SyncError>(())
        });

        fs::create_dir_all(&self.config.dest).await.ok();
        let dest_list = self.build_dest_list().await?;
        tracing::debug!("destination holds {} entries", dest_list.len());

        tx.send(Message::AskFileList(ListOptions {
            attrs: self.config.attrs().bits(),
            recursive: self.config.recursive,
            dirs: self.config.dirs,
        }))
        .await
        .map_err(|_| SyncError::Transport("outbound channel closed".into()))?;

        let mut generator_task = None;
        let mut dest_list = Some(dest_list);

        loop {
            match recv_message(&mut inbound, &self.framing).await? {
                Message::FileList(list) => {
                    tracing::debug!("file list received ({} entries)", list.len());
                    if let Some(dest_list) = dest_list.take() {
                        let generator = Generator::new(self.config.clone(), tx.clone());
                        generator_task = Some(tokio::spawn(generator.run(list, dest_list)));
                    }
                }
                Message::FileData(fd) => self.apply_file_data(fd).await,
                Message::FileDataOffset(mv) => self.apply_move(mv).await,
                Message::DeleteFiles(paths) => self.apply_deletes(paths).await,
                Message::End => {
                    tracing::debug!("end of transmission");
                    tx.send(Message::ServerFinished).await.ok();
                    break;
                }
                Message::FileDataEnd | Message::Pong => {}
                other => {
                    tracing::warn!("receiver ignoring unexpected {:?}", other.tag());
                }
            }
        }

        if let Some(task) = generator_task {
            task.await.ok();
        }
        drop(tx);
        writer_task
            .await
            .map_err(|e| SyncError::Transport(format!("writer task failed: {e}")))??;

        Ok(self.stats)
    }

    async fn build_dest_list(&self) -> Result<Vec<FileEntry>> {
        let root = format!("{}/", self.config.dest.trim_end_matches('/'));
        let opts = ListOptions {
            attrs: self.config.attrs().bits(),
            recursive: self.config.recursive,
            dirs: true,
        };
        let list = tokio::task::spawn_blocking(move || build_file_list(&[root], &opts))
            .await
            .map_err(|e| std::io::Error::other(e))??;
        Ok(list)
    }

    fn resolve(&self, source: usize, rel: &str) -> PathBuf {
        resolve_target(&self.config.dest, &self.config.sources, source, rel)
    }

    /// Moves carry no source index; a move only ever targets an existing
    /// file, so probe each source root's layout for it.
    fn find_existing_target(&self, rel: &str) -> Option<PathBuf> {
        (0..self.config.sources.len().max(1))
            .map(|s| self.resolve(s, rel))
            .find(|p| p.exists())
    }

    async fn apply_file_data(&mut self, fd: FileData) {
        let target = self.resolve(fd.info.source as usize, &fd.path);
        let is_dir_marker = fd.path.ends_with('/');

        let result = if is_dir_marker {
            self.create_directory(&target, &fd.info).await
        } else if fs::symlink_metadata(&target).await.is_err() {
            self.create_file(&target, &fd).await
        } else {
            self.modify_file(&target, &fd).await
        };

        if let Err(err) = result {
            self.stats.files_skipped += 1;
            tracing::warn!("{}: {err}", target.display());
        }
    }

    async fn create_directory(&mut self, target: &Path, info: &FileMeta) -> std::io::Result<()> {
        if let Ok(md) = fs::symlink_metadata(target).await {
            if !md.is_dir() {
                fs::remove_file(target).await?;
            }
        }
        tracing::info!("creating directory {}", target.display());
        fs::create_dir_all(target).await?;
        self.apply_metadata(target, info).await;
        self.stats.dirs_created += 1;
        Ok(())
    }

    async fn create_file(&mut self, target: &Path, fd: &FileData) -> std::io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        tracing::info!("creating file {}", target.display());
        fs::write(target, &fd.data).await?;
        self.apply_metadata(target, &fd.info).await;
        self.create_hard_links(target, &fd.info).await;
        self.stats.files_created += 1;
        self.stats.bytes_written += fd.data.len() as u64;
        Ok(())
    }

    async fn modify_file(&mut self, target: &Path, fd: &FileData) -> std::io::Result<()> {
        let md = fs::symlink_metadata(target).await?;
        if md.is_dir() {
            // A file replaces a directory; non-empty ones need --force.
            let removed = if self.config.force {
                fs::remove_dir_all(target).await
            } else {
                fs::remove_dir(target).await
            };
            removed?;
            return self.create_file(target, fd).await;
        }

        if fd.data.is_empty() && !fd.whole_file && fd.end == 0 {
            tracing::debug!("touching {}", target.display());
            self.apply_metadata(target, &fd.info).await;
            self.stats.files_touched += 1;
            return Ok(());
        }

        tracing::info!(
            "patching {} bytes {}..{}",
            target.display(),
            fd.start,
            fd.start + fd.data.len() as u64
        );
        let mut file = OpenOptions::new().write(true).open(target).await?;
        file.seek(SeekFrom::Start(fd.start)).await?;
        file.write_all(&fd.data).await?;
        if (fd.data.len() as u64) < fd.end.saturating_sub(fd.start) || fd.whole_file {
            let pos = fd.start + fd.data.len() as u64;
            file.set_len(pos).await?;
        }
        file.flush().await?;
        drop(file);

        self.apply_metadata(target, &fd.info).await;
        self.stats.files_updated += 1;
        self.stats.bytes_written += fd.data.len() as u64;
        Ok(())
    }

    /// Copy `[start, end]` forward by `offset`, then zero the vacated
    /// prefix so the literals that follow can fill it.
    async fn apply_move(&mut self, mv: OffsetPayload) {
        let Some(target) = self.find_existing_target(&mv.path) else {
            self.stats.files_skipped += 1;
            tracing::warn!("move for unknown file {}", mv.path);
            return;
        };
        if let Err(err) = self.shift_region(&target, &mv).await {
            self.stats.files_skipped += 1;
            tracing::warn!("{}: {err}", target.display());
        }
    }

    async fn shift_region(&self, target: &Path, mv: &OffsetPayload) -> std::io::Result<()> {
        tracing::debug!(
            "moving {} bytes {}..={} forward by {}",
            target.display(),
            mv.start,
            mv.end,
            mv.offset
        );
        let mut file = OpenOptions::new().read(true).write(true).open(target).await?;
        let len = file.metadata().await?.len();

        let start = mv.start.min(len);
        let want = mv.end + 1 - mv.start;
        let take = (len - start).min(want);

        let mut chunk = vec![0u8; take as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut chunk).await?;

        file.seek(SeekFrom::Start(mv.start + mv.offset)).await?;
        file.write_all(&chunk).await?;
        if take < want {
            let new_len = mv.start + mv.offset + take;
            if new_len < len {
                file.set_len(new_len).await?;
            }
        }

        file.seek(SeekFrom::Start(mv.start)).await?;
        file.write_all(&vec![0u8; mv.offset as usize]).await?;
        file.flush().await?;
        Ok(())
    }

    async fn apply_deletes(&mut self, paths: Vec<String>) {
        for rel in paths {
            let target = Path::new(&self.config.dest).join(&rel);
            let md = match fs::symlink_metadata(&target).await {
                Ok(md) => md,
                Err(_) => continue,
            };
            tracing::info!("deleting {}", target.display());
            let result = if md.is_dir() {
                if self.config.force {
                    fs::remove_dir_all(&target).await
                } else {
                    fs::remove_dir(&target).await
                }
            } else {
                fs::remove_file(&target).await
            };
            match result {
                Ok(()) => self.stats.files_deleted += 1,
                Err(err) => {
                    self.stats.files_skipped += 1;
                    tracing::warn!("cannot delete {}: {err}", target.display());
                }
            }
        }
    }

    async fn apply_metadata(&self, target: &Path, info: &FileMeta) {
        #[cfg(unix)]
        if self.config.perms {
            if let Some(mode) = info.mode {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(mode & 0o777);
                if let Err(err) = fs::set_permissions(target, perms).await {
                    tracing::warn!("cannot set permissions on {}: {err}", target.display());
                }
            }
        }

        if let Some(mtime) = info.mtime {
            let set_atime = self.config.times.then_some(info.atime).flatten();
            let path = target.to_path_buf();
            let result = tokio::task::spawn_blocking(move || {
                let mtime = filetime::FileTime::from_unix_time(mtime, 0);
                match set_atime {
                    Some(atime) => filetime::set_file_times(
                        &path,
                        filetime::FileTime::from_unix_time(atime, 0),
                        mtime,
                    ),
                    None => filetime::set_file_mtime(&path, mtime),
                }
            })
            .await;
            if let Ok(Err(err)) = result {
                tracing::warn!("cannot set times on {}: {err}", target.display());
            }
        }
    }

    /// Re-create the peer names of a multiply-linked file against the copy
    /// that was just written.
    async fn create_hard_links(&mut self, written: &Path, info: &FileMeta) {
        if !self.config.hard_links {
            return;
        }
        let Some(links) = &info.links else { return };
        for rel in links {
            let peer = self.resolve(info.source as usize, rel);
            if fs::symlink_metadata(&peer).await.is_ok() {
                continue;
            }
            if let Some(parent) = peer.parent() {
                fs::create_dir_all(parent).await.ok();
            }
            match fs::hard_link(written, &peer).await {
                Ok(()) => self.stats.links_created += 1,
                Err(err) => {
                    tracing::warn!("cannot link {}: {err}", peer.display());
                }
            }
        }
    }
}
