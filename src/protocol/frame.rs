//! Frame codec for the §6 wire format.
//!
//! Every message is `packet_count:u32 | tag:u32 | [FILE_DATA header] |`
//! `packet_count × (index:u32 | length:u32 | payload)`, all integers
//! big-endian. Structured payloads are CBOR; FILE_DATA payloads are raw
//! file bytes, optionally deflate-compressed. A frame is assembled into one
//! buffer and written with a single call so partially-written frames never
//! reach the peer.

use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;

use super::info::FileMeta;
use super::message::{FileData, Message, PeerKind, Tag};
use super::transport::Transport;
use crate::error::{Result, SyncError};

/// Maximum payload bytes per packet. Peers must tolerate larger values; we
/// always emit this one.
pub const MAX_PACKET: usize = 256;

/// Per-session framing settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Framing {
    /// Compress FILE_DATA payloads.
    pub compress: bool,
    /// Deflate level 1..=9.
    pub level: u32,
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| SyncError::Codec(format!("encode: {e}")))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| SyncError::Codec(format!("decode: {e}")))
}

fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(level));
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut dec = ZlibDecoder::new(Vec::new());
    dec.write_all(data)?;
    Ok(dec.finish()?)
}

fn wire_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| SyncError::Codec(format!("{what} {value} exceeds u32")))
}

/// Encode a message into a single wire frame.
pub fn encode_message(msg: &Message, framing: &Framing) -> Result<Bytes> {
    let payload: Vec<u8> = match msg {
        Message::AskFileList(opts) => to_cbor(opts)?,
        Message::FileList(entries) => to_cbor(entries)?,
        Message::AskFileData(req) => to_cbor(req)?,
        Message::FileDataOffset(mv) => to_cbor(mv)?,
        Message::DeleteFiles(paths) => to_cbor(paths)?,
        Message::FileData(fd) => {
            if framing.compress {
                deflate(&fd.data, framing.level)?
            } else {
                fd.data.to_vec()
            }
        }
        Message::SocketIdentification(kind) => (*kind as u32).to_be_bytes().to_vec(),
        Message::FileDataEnd
        | Message::End
        | Message::GeneratorFinished
        | Message::ServerFinished
        | Message::Ping
        | Message::Pong => to_cbor(&())?,
    };

    let packet_count = payload.len() / MAX_PACKET + 1;
    let mut frame = BytesMut::with_capacity(payload.len() + 64);
    frame.put_u32(packet_count as u32);
    frame.put_u32(msg.tag() as u32);

    if let Message::FileData(fd) = msg {
        let name = fd.path.as_bytes();
        frame.put_u32(name.len() as u32);
        frame.put_slice(name);
        let info = to_cbor(&fd.info)?;
        frame.put_u32(info.len() as u32);
        frame.put_slice(&info);
        frame.put_u32(wire_u32(fd.start, "start")?);
        frame.put_u32(wire_u32(fd.end, "end")?);
        frame.put_u8(fd.whole_file as u8);
    }

    for (i, chunk) in payload
        .chunks(MAX_PACKET)
        .chain(std::iter::repeat(&[][..]))
        .take(packet_count)
        .enumerate()
    {
        frame.put_u32(i as u32);
        frame.put_u32(chunk.len() as u32);
        frame.put_slice(chunk);
    }

    Ok(frame.freeze())
}

/// Send one message as an atomic frame.
pub async fn send_message(
    transport: &mut (dyn Transport + '_),
    msg: &Message,
    framing: &Framing,
) -> Result<()> {
    let frame = encode_message(msg, framing)?;
    transport.write_all(&frame).await
}

async fn read_u32(transport: &mut (dyn Transport + '_)) -> Result<Option<u32>> {
    match transport.read_exact(4).await? {
        Some(b) => Ok(Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))),
        None => Ok(None),
    }
}

async fn read_bytes(transport: &mut (dyn Transport + '_), n: usize) -> Result<Option<Bytes>> {
    if n == 0 {
        return Ok(Some(Bytes::new()));
    }
    transport.read_exact(n).await
}

/// Receive one message. A clean EOF at any field boundary is delivered as
/// END; a partial field is a short-read failure.
pub async fn recv_message(
    transport: &mut (dyn Transport + '_),
    framing: &Framing,
) -> Result<Message> {
    let packet_count = match read_u32(transport).await? {
        Some(v) => v,
        None => return Ok(Message::End),
    };
    let tag = match read_u32(transport).await? {
        Some(v) => v,
        None => return Ok(Message::End),
    };
    if tag == 0 {
        return Err(SyncError::Transport("invalid tag 0".into()));
    }
    let tag = Tag::from_u32(tag)
        .ok_or_else(|| SyncError::Transport(format!("unknown tag {tag}")))?;

    let mut header = None;
    if tag == Tag::FileData {
        let name_len = match read_u32(transport).await? {
            Some(v) => v as usize,
            None => return Ok(Message::End),
        };
        let name = match read_bytes(transport, name_len).await? {
            Some(b) => String::from_utf8(b.to_vec())
                .map_err(|_| SyncError::Codec("filename is not UTF-8".into()))?,
            None => return Ok(Message::End),
        };
        let info_len = match read_u32(transport).await? {
            Some(v) => v as usize,
            None => return Ok(Message::End),
        };
        let info: FileMeta = match read_bytes(transport, info_len).await? {
            Some(b) => from_cbor(&b)?,
            None => return Ok(Message::End),
        };
        let start = match read_u32(transport).await? {
            Some(v) => v,
            None => return Ok(Message::End),
        };
        let end = match read_u32(transport).await? {
            Some(v) => v,
            None => return Ok(Message::End),
        };
        let whole = match read_bytes(transport, 1).await? {
            Some(b) => b[0] != 0,
            None => return Ok(Message::End),
        };
        header = Some((name, info, start, end, whole));
    }

    let mut payload = BytesMut::new();
    for _ in 0..packet_count {
        let _index = match read_u32(transport).await? {
            Some(v) => v,
            None => return Ok(Message::End),
        };
        let len = match read_u32(transport).await? {
            Some(v) => v as usize,
            None => return Ok(Message::End),
        };
        match read_bytes(transport, len).await? {
            Some(b) => payload.put_slice(&b),
            None => return Ok(Message::End),
        }
    }
    let payload = payload.freeze();

    let msg = match tag {
        Tag::AskFileList => Message::AskFileList(from_cbor(&payload)?),
        Tag::FileList => Message::FileList(from_cbor(&payload)?),
        Tag::AskFileData => Message::AskFileData(from_cbor(&payload)?),
        Tag::FileDataOffset => Message::FileDataOffset(from_cbor(&payload)?),
        Tag::DeleteFiles => Message::DeleteFiles(from_cbor(&payload)?),
        Tag::FileData => {
            let (path, info, start, end, whole_file) = header.unwrap();
            let data = if framing.compress {
                Bytes::from(inflate(&payload)?)
            } else {
                payload
            };
            Message::FileData(FileData {
                path,
                info,
                start: u64::from(start),
                end: u64::from(end),
                whole_file,
                data,
            })
        }
        Tag::SocketIdentification => {
            if payload.len() < 4 {
                return Err(SyncError::Transport("socket identification truncated".into()));
            }
            let v = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let kind = match v {
                1 => PeerKind::Client,
                2 => PeerKind::Server,
                other => {
                    return Err(SyncError::Transport(format!(
                        "unknown socket identification {other}"
                    )))
                }
            };
            Message::SocketIdentification(kind)
        }
        Tag::FileDataEnd => Message::FileDataEnd,
        Tag::End => Message::End,
        Tag::GeneratorFinished => Message::GeneratorFinished,
        Tag::ServerFinished => Message::ServerFinished,
        Tag::Ping => Message::Ping,
        Tag::Pong => Message::Pong,
    };
    Ok(msg)
}
