//! Message tags and the tagged union flowing on the wire.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::info::FileMeta;
use crate::filelist::FileEntry;

/// Numeric tag codes. The values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Tag {
    AskFileList = 1,
    FileList = 2,
    AskFileData = 3,
    FileData = 4,
    FileDataEnd = 5,
    FileDataOffset = 6,
    End = 7,
    GeneratorFinished = 8,
    DeleteFiles = 9,
    ServerFinished = 10,
    SocketIdentification = 11,
    Ping = 12,
    Pong = 13,
}

impl Tag {
    pub fn from_u32(v: u32) -> Option<Tag> {
        match v {
            1 => Some(Tag::AskFileList),
            2 => Some(Tag::FileList),
            3 => Some(Tag::AskFileData),
            4 => Some(Tag::FileData),
            5 => Some(Tag::FileDataEnd),
            6 => Some(Tag::FileDataOffset),
            7 => Some(Tag::End),
            8 => Some(Tag::GeneratorFinished),
            9 => Some(Tag::DeleteFiles),
            10 => Some(Tag::ServerFinished),
            11 => Some(Tag::SocketIdentification),
            12 => Some(Tag::Ping),
            13 => Some(Tag::Pong),
            _ => None,
        }
    }
}

/// Which end of a daemon socket a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Client = 1,
    Server = 2,
}

/// File-list request options: the attribute bitset plus the walk shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ListOptions {
    pub attrs: u32,
    pub recursive: bool,
    pub dirs: bool,
}

/// Request for one file's data, keyed by the destination's block digests.
/// Empty digests or a negative total length mean "send the whole file".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRequest {
    pub path: String,
    pub source: u32,
    pub digests: Vec<u32>,
    pub total_len: i64,
}

/// Literal file bytes (or a metadata-only touch when empty with
/// `whole_file` unset).
#[derive(Debug, Clone, PartialEq)]
pub struct FileData {
    pub path: String,
    pub info: FileMeta,
    pub start: u64,
    pub end: u64,
    pub whole_file: bool,
    pub data: Bytes,
}

/// Wire payload of FILE_DATA_OFFSET: bytes `[start, end]` of the
/// destination file shift right by `offset`, the vacated prefix is
/// zero-filled for later literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetPayload {
    pub path: String,
    pub start: u64,
    pub end: u64,
    pub offset: u64,
}

/// The tagged union exchanged between the roles.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    AskFileList(ListOptions),
    FileList(Vec<FileEntry>),
    AskFileData(FileRequest),
    FileData(FileData),
    FileDataEnd,
    FileDataOffset(OffsetPayload),
    End,
    GeneratorFinished,
    DeleteFiles(Vec<String>),
    ServerFinished,
    SocketIdentification(PeerKind),
    Ping,
    Pong,
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::AskFileList(_) => Tag::AskFileList,
            Message::FileList(_) => Tag::FileList,
            Message::AskFileData(_) => Tag::AskFileData,
            Message::FileData(_) => Tag::FileData,
            Message::FileDataEnd => Tag::FileDataEnd,
            Message::FileDataOffset(_) => Tag::FileDataOffset,
            Message::End => Tag::End,
            Message::GeneratorFinished => Tag::GeneratorFinished,
            Message::DeleteFiles(_) => Tag::DeleteFiles,
            Message::ServerFinished => Tag::ServerFinished,
            Message::SocketIdentification(_) => Tag::SocketIdentification,
            Message::Ping => Tag::Ping,
            Message::Pong => Tag::Pong,
        }
    }
}
