//! Block-divided file digests.
//!
//! A file of length T split into N blocks of length ⌊T/N⌋+1 (the final
//! block may describe a shorter or empty range). The digest carries one
//! weak checksum per block; the peer recovers the block length from
//! `(total_length, block count)` alone, so the count is always exactly N.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use super::rolling::{weak_checksum, RollingSum};

/// Ceiling on the block length chosen by the heuristic.
const MAX_BLOCK_LEN: u64 = 131_072;

/// Floor on the block length chosen by the heuristic.
const MIN_BLOCK_LEN: u64 = 700;

/// A destination file described as per-block weak checksums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDigestSet {
    pub block_len: u64,
    pub total_len: u64,
    pub blocks: Vec<u32>,
}

impl BlockDigestSet {
    /// Digest a byte slice into exactly `n` blocks.
    pub fn from_bytes(data: &[u8], n: u64) -> BlockDigestSet {
        let n = n.max(1);
        let total_len = data.len() as u64;
        let block_len = total_len / n + 1;
        let mut blocks = Vec::with_capacity(n as usize);
        for i in 0..n {
            let start = (i * block_len).min(total_len) as usize;
            let end = ((i + 1) * block_len).min(total_len) as usize;
            blocks.push(weak_checksum(&data[start..end]));
        }
        BlockDigestSet {
            block_len,
            total_len,
            blocks,
        }
    }

    /// Digest a file on disk into exactly `n` blocks.
    pub fn from_file(path: &Path, n: u64) -> io::Result<BlockDigestSet> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        Ok(Self::from_bytes(&data, n))
    }

    /// Rebuild a digest from its wire representation. The block length is
    /// recovered as ⌊T/N⌋+1, mirroring the split in [`from_bytes`].
    pub fn from_wire(blocks: Vec<u32>, total_len: u64) -> BlockDigestSet {
        let n = blocks.len().max(1) as u64;
        BlockDigestSet {
            block_len: total_len / n + 1,
            total_len,
            blocks,
        }
    }

    /// The byte range a block describes, clamped to the file length. Blocks
    /// past the end describe empty ranges.
    pub fn block_range(&self, index: usize) -> (u64, u64) {
        let start = (index as u64 * self.block_len).min(self.total_len);
        let end = ((index as u64 + 1) * self.block_len).min(self.total_len);
        (start, end)
    }
}

/// Block length for a file of `size` bytes, after rsync's heuristic:
/// the square root of the next power of two above the size, clamped to
/// [700, 131072].
pub fn block_len_for(size: u64) -> u64 {
    if size == 0 {
        return MIN_BLOCK_LEN;
    }
    let log2 = 64 - (size - 1).leading_zeros(); // ceil(log2 size)
    let next_pow = 1u128 << (log2 + 1);
    let root = (next_pow as f64).sqrt().ceil() as u64;
    root.clamp(MIN_BLOCK_LEN, MAX_BLOCK_LEN)
}

/// Number of blocks a modified file of `size` bytes is divided into.
pub fn block_count_for(size: u64, whole_file: bool) -> u64 {
    if whole_file || size == 0 {
        return 1;
    }
    size.div_ceil(block_len_for(size)).max(1)
}

/// Whole-file weak checksum, streamed.
pub fn file_checksum(path: &Path) -> io::Result<u32> {
    let mut file = File::open(path)?;
    let mut sum = RollingSum::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sum.update(&buf[..n]);
    }
    Ok(sum.value())
}
