//! Weak checksums: the rolling engine and block-divided file digests.

pub mod digest;
pub mod rolling;

pub use digest::{block_count_for, block_len_for, file_checksum, BlockDigestSet};
pub use rolling::{weak_checksum, RollingSum};
