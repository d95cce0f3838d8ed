//! Sender: owns the source tree, answers list and data requests.
//!
//! One loop over one endpoint. The dialogue finishes when both the
//! generator's work stream and the receiver have said they are done.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::checksum::BlockDigestSet;
use crate::delta::{scan, DeltaPart};
use crate::error::Result;
use crate::filelist::{build_file_list, FileEntry};
use crate::path::resolve_source;
use crate::protocol::message::{FileData, FileRequest, OffsetPayload};
use crate::protocol::{
    recv_message, send_message, AttrFlags, FileMeta, Framing, ListOptions, Message, Transport,
};
use crate::session::SessionConfig;

pub struct Sender {
    config: Arc<SessionConfig>,
    framing: Framing,
    /// Hard-link peers from the last built file list, keyed by
    /// (source index, relative path).
    links: HashMap<(u32, String), Vec<String>>,
}

impl Sender {
    pub fn new(config: Arc<SessionConfig>) -> Sender {
        let framing = config.framing();
        Sender {
            config,
            framing,
            links: HashMap::new(),
        }
    }

    /// Serve the peer until the session is over.
    pub async fn run(mut self, transport: &mut (dyn Transport + '_)) -> Result<()> {
        let mut generator_finished = false;
        let mut receiver_finished = false;

        while !(generator_finished && receiver_finished) {
            let msg = recv_message(transport, &self.framing).await?;
            match msg {
                Message::AskFileList(opts) => {
                    tracing::debug!("file list requested");
                    let list = self.build_list(opts).await?;
                    self.remember_links(&list);
                    send_message(transport, &Message::FileList(list), &self.framing).await?;
                }
                Message::Ping => {
                    send_message(transport, &Message::Pong, &self.framing).await?;
                }
                Message::AskFileData(req) => {
                    self.serve_file(transport, req).await?;
                }
                Message::DeleteFiles(paths) => {
                    // Deletion happens on the receiver; relay untouched.
                    send_message(transport, &Message::DeleteFiles(paths), &self.framing)
                        .await?;
                }
                Message::GeneratorFinished => {
                    tracing::debug!("generator finished, closing work stream");
                    send_message(transport, &Message::End, &self.framing).await?;
                    generator_finished = true;
                }
                Message::ServerFinished => {
                    tracing::debug!("receiver finished");
                    receiver_finished = true;
                }
                Message::End => break,
                other => {
                    tracing::warn!("sender ignoring unexpected {:?}", other.tag());
                }
            }
        }

        transport.close().await.ok();
        tracing::debug!("sender closed");
        Ok(())
    }

    async fn build_list(&self, opts: ListOptions) -> Result<Vec<FileEntry>> {
        let sources = self.config.sources.clone();
        let list = tokio::task::spawn_blocking(move || build_file_list(&sources, &opts))
            .await
            .map_err(|e| std::io::Error::other(e))??;
        Ok(list)
    }

    fn remember_links(&mut self, list: &[FileEntry]) {
        self.links.clear();
        for entry in list {
            if let Some(links) = &entry.meta.links {
                self.links
                    .insert((entry.source, entry.path.clone()), links.clone());
            }
        }
    }

    /// Answer one ASK_FILE_DATA: a directory marker, the whole file, a
    /// metadata touch, or a stream of moves and literals from the delta
    /// scan.
    async fn serve_file(
        &mut self,
        transport: &mut (dyn Transport + '_),
        req: FileRequest,
    ) -> Result<()> {
        let target = resolve_source(&self.config.sources, req.source as usize, &req.path);
        tracing::debug!("file data requested for {}", target.display());

        let md = match tokio::fs::metadata(&target).await {
            Ok(md) => md,
            Err(err) => {
                tracing::warn!("cannot stat {}: {err}", target.display());
                return Ok(());
            }
        };
        let info = self.file_info(&req, &md);

        if md.is_dir() {
            let msg = Message::FileData(FileData {
                path: format!("{}/", req.path),
                info,
                start: 0,
                end: 0,
                whole_file: true,
                data: Bytes::new(),
            });
            return send_message(transport, &msg, &self.framing).await;
        }

        let contents = match tokio::fs::read(&target).await {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!("cannot read {}: {err}", target.display());
                return Ok(());
            }
        };

        if req.digests.is_empty() || req.total_len < 0 {
            let msg = Message::FileData(FileData {
                path: req.path.clone(),
                info,
                start: 0,
                end: 0,
                whole_file: true,
                data: Bytes::from(contents),
            });
            return send_message(transport, &msg, &self.framing).await;
        }

        let digests = BlockDigestSet::from_wire(req.digests, req.total_len as u64);
        let parts = scan(&contents, &digests);

        if parts.is_empty() {
            // Content already agrees; a zero-byte touch refreshes metadata.
            tracing::debug!("{} is already up to date", req.path);
            let msg = Message::FileData(FileData {
                path: req.path.clone(),
                info,
                start: 0,
                end: 0,
                whole_file: false,
                data: Bytes::new(),
            });
            return send_message(transport, &msg, &self.framing).await;
        }

        for part in parts {
            let msg = self.part_message(&req.path, &info, &contents, part);
            send_message(transport, &msg, &self.framing).await?;
        }
        Ok(())
    }

    fn part_message(
        &self,
        path: &str,
        info: &FileMeta,
        contents: &[u8],
        part: DeltaPart,
    ) -> Message {
        if part.is_move() {
            return Message::FileDataOffset(OffsetPayload {
                path: path.to_string(),
                start: part.start,
                end: part.end,
                offset: part.offset,
            });
        }
        // Literal reads are end-inclusive and clamped to the file length.
        let from = (part.start as usize).min(contents.len());
        let to = ((part.end + 1) as usize).min(contents.len());
        Message::FileData(FileData {
            path: path.to_string(),
            info: info.clone(),
            start: part.start,
            end: part.end,
            whole_file: false,
            data: Bytes::copy_from_slice(&contents[from..to]),
        })
    }

    fn file_info(&self, req: &FileRequest, md: &std::fs::Metadata) -> FileMeta {
        let mut info = FileMeta::from_metadata(md, self.attrs());
        info.source = req.source;
        if self.config.hard_links {
            if let Some(links) = self.links.get(&(req.source, req.path.clone())) {
                info.links = Some(links.clone());
            }
        }
        info
    }

    fn attrs(&self) -> AttrFlags {
        self.config.attrs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StreamTransport;
    use std::fs;
    use tempfile::TempDir;

    fn sender_config(root: &str) -> Arc<SessionConfig> {
        Arc::new(SessionConfig {
            sources: vec![format!("{root}/")],
            dest: String::new(),
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
            delete: false,
            force: false,
            whole_file: false,
            compress: false,
            compress_level: 9,
            timeout: 0,
        })
    }

    async fn drive(root: &TempDir, requests: Vec<Message>) -> Vec<Message> {
        let (near, far) = tokio::io::duplex(1 << 20);
        let (nr, nw) = tokio::io::split(near);
        let (fr, fw) = tokio::io::split(far);
        let mut peer = StreamTransport::new(nr, nw, 0);

        let config = sender_config(&root.path().display().to_string());
        let framing = config.framing();
        let sender = Sender::new(config);
        let task = tokio::spawn(async move {
            let mut transport = StreamTransport::new(fr, fw, 0);
            sender.run(&mut transport).await
        });

        for req in requests {
            send_message(&mut peer, &req, &framing).await.unwrap();
        }
        send_message(&mut peer, &Message::GeneratorFinished, &framing)
            .await
            .unwrap();
        send_message(&mut peer, &Message::ServerFinished, &framing)
            .await
            .unwrap();

        let mut replies = Vec::new();
        loop {
            match recv_message(&mut peer, &framing).await.unwrap() {
                Message::End => break,
                msg => replies.push(msg),
            }
        }
        task.await.unwrap().unwrap();
        replies
    }

    #[tokio::test]
    async fn whole_file_reply_for_empty_digests() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("hello.txt"), "hello").unwrap();

        let replies = drive(
            &tmp,
            vec![Message::AskFileData(FileRequest {
                path: "hello.txt".into(),
                source: 0,
                digests: vec![],
                total_len: -1,
            })],
        )
        .await;

        match &replies[0] {
            Message::FileData(fd) => {
                assert!(fd.whole_file);
                assert_eq!(&fd.data[..], b"hello");
                assert_eq!(fd.info.size, Some(5));
            }
            other => panic!("expected FileData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn directory_reply_carries_slash_marker() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();

        let replies = drive(
            &tmp,
            vec![Message::AskFileData(FileRequest {
                path: "sub".into(),
                source: 0,
                digests: vec![],
                total_len: -1,
            })],
        )
        .await;

        match &replies[0] {
            Message::FileData(fd) => {
                assert_eq!(fd.path, "sub/");
                assert!(fd.data.is_empty());
            }
            other => panic!("expected FileData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identical_content_replies_with_touch() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("same.txt"), "stable contents").unwrap();
        let digests = BlockDigestSet::from_bytes(b"stable contents", 2);

        let replies = drive(
            &tmp,
            vec![Message::AskFileData(FileRequest {
                path: "same.txt".into(),
                source: 0,
                digests: digests.blocks,
                total_len: digests.total_len as i64,
            })],
        )
        .await;

        match &replies[0] {
            Message::FileData(fd) => {
                assert!(!fd.whole_file);
                assert!(fd.data.is_empty());
                assert_eq!((fd.start, fd.end), (0, 0));
            }
            other => panic!("expected touch FileData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shifted_content_sends_move_then_literal() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("s.bin"), " test").unwrap();
        let digests = BlockDigestSet::from_bytes(b"test", 1);

        let replies = drive(
            &tmp,
            vec![Message::AskFileData(FileRequest {
                path: "s.bin".into(),
                source: 0,
                digests: digests.blocks,
                total_len: digests.total_len as i64,
            })],
        )
        .await;

        match &replies[0] {
            Message::FileDataOffset(mv) => {
                assert_eq!((mv.start, mv.end, mv.offset), (0, 4, 1));
            }
            other => panic!("expected FileDataOffset first, got {other:?}"),
        }
        match &replies[1] {
            Message::FileData(fd) => {
                assert_eq!((fd.start, fd.end), (0, 1));
                assert_eq!(&fd.data[..], b" t");
            }
            other => panic!("expected literal FileData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_gets_pong_and_list_request_gets_list() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), "x").unwrap();

        let replies = drive(
            &tmp,
            vec![
                Message::Ping,
                Message::AskFileList(ListOptions {
                    attrs: AttrFlags::FILE_SIZE.bits(),
                    recursive: true,
                    dirs: true,
                }),
            ],
        )
        .await;

        assert_eq!(replies[0], Message::Pong);
        match &replies[1] {
            Message::FileList(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].path, "a");
            }
            other => panic!("expected FileList, got {other:?}"),
        }
    }
}
