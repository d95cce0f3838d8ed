//! Delta scan: match a source file against a destination block digest.
//!
//! The output is an ordered list of parts `(start, end, offset)`:
//!
//! * `offset > 0` is a MOVE: the destination already holds these bytes at
//!   `[start, end]` and must shift them right by `offset`.
//! * `offset = 0` is a LITERAL: the receiver needs the source bytes for
//!   `[start, end]`.
//!
//! Ranges are applied end-inclusive by the peers. MOVEs are ordered before
//! LITERALs so overlapping destination bytes are shifted before the holes
//! they leave are overwritten.

use crate::checksum::{BlockDigestSet, RollingSum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaPart {
    pub start: u64,
    pub end: u64,
    pub offset: u64,
}

impl DeltaPart {
    fn literal(start: u64, end: u64) -> DeltaPart {
        DeltaPart {
            start,
            end,
            offset: 0,
        }
    }

    pub fn is_move(&self) -> bool {
        self.offset > 0
    }
}

/// Scan `source` against the destination digest and produce the parts that
/// turn the destination into the source.
///
/// An empty part list means the files already agree block for block.
pub fn scan(source: &[u8], digests: &BlockDigestSet) -> Vec<DeltaPart> {
    let t_src = source.len() as u64;
    let t_dst = digests.total_len;

    if t_src == 0 {
        // Nothing to match against; one empty literal truncates the
        // destination to zero bytes.
        if t_dst == 0 {
            return Vec::new();
        }
        return vec![DeltaPart::literal(0, t_dst)];
    }

    let b = digests.block_len;
    let mut parts: Vec<DeltaPart> = Vec::new();
    // Shift carried from the last matched block; later blocks start their
    // window displaced by it and MOVE offsets include it.
    let mut carry: u64 = 0;
    // First source position not yet produced by a literal or a match.
    let mut covered: u64 = 0;

    for (i, &expected) in digests.blocks.iter().enumerate() {
        let (blk_start, blk_end) = digests.block_range(i);
        let blk_len = blk_end - blk_start;
        if blk_len == 0 {
            continue;
        }

        let base = i as u64 * b;
        let mut shift = carry;
        let win_start = base + shift;
        if win_start >= t_src {
            parts.push(DeltaPart::literal(base, base + b));
            covered = covered.max(base + b + 1);
            continue;
        }

        let mut front = win_start;
        let mut back = (win_start + blk_len).min(t_src);
        let mut sum = RollingSum::from_bytes(&source[front as usize..back as usize]);
        let mut matched = false;

        while shift < b {
            if !sum.is_empty() && sum.value() == expected {
                if shift > 0 {
                    parts.push(DeltaPart::literal(base, base + shift));
                    parts.push(DeltaPart {
                        start: base,
                        end: base + b - shift,
                        offset: shift,
                    });
                }
                carry = shift;
                covered = covered.max(blk_end + shift);
                matched = true;
                break;
            }
            if back < t_src {
                sum.roll(source[front as usize], source[back as usize]);
                front += 1;
                back += 1;
            } else if front < back {
                // Source ends before the window does; keep sliding the
                // front edge only.
                sum.shrink(source[front as usize]);
                front += 1;
            } else {
                break;
            }
            shift += 1;
        }

        if !matched {
            parts.push(DeltaPart::literal(base, base + b));
            covered = covered.max(base + b + 1);
        }
    }

    // Tail regions: send whatever the blocks did not produce, or signal the
    // truncation point when the source shrank.
    if t_src > covered {
        parts.push(DeltaPart::literal(covered, t_src));
    } else if t_src < t_dst {
        parts.push(DeltaPart::literal(t_src, t_dst));
    }

    order_parts(parts)
}

/// Merge contiguous parts with the same offset, then order MOVEs before
/// LITERALs (stable within each class).
fn order_parts(parts: Vec<DeltaPart>) -> Vec<DeltaPart> {
    let mut merged: Vec<DeltaPart> = Vec::with_capacity(parts.len());
    for part in parts {
        match merged.last_mut() {
            Some(last) if last.end == part.start && last.offset == part.offset => {
                last.end = part.end;
            }
            _ => merged.push(part),
        }
    }
    merged.sort_by_key(|p| !p.is_move());
    merged
}

/// Apply scanned parts to an in-memory copy of the destination; test-side
/// mirror of the receiver's file apply, used to validate the invariant that
/// the parts rebuild the source byte for byte.
#[cfg(test)]
pub fn apply_parts(source: &[u8], dest: &[u8], parts: &[DeltaPart]) -> Vec<u8> {
    let mut out = dest.to_vec();
    for part in parts {
        let start = part.start as usize;
        let end = part.end as usize;
        if part.is_move() {
            let offset = part.offset as usize;
            let take = out.len().min(end + 1).saturating_sub(start);
            let chunk = out[start..start + take].to_vec();
            if out.len() < start + offset + take {
                out.resize(start + offset + take, 0);
            }
            out[start + offset..start + offset + take].copy_from_slice(&chunk);
            for b in &mut out[start..start + offset] {
                *b = 0;
            }
        } else {
            let take = source.len().min(end + 1).saturating_sub(start.min(source.len()));
            let chunk = &source[start.min(source.len())..start.min(source.len()) + take];
            if out.len() < start + take {
                out.resize(start + take, 0);
            }
            out[start..start + take].copy_from_slice(chunk);
            if take < end - start {
                out.truncate(start + take);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::BlockDigestSet;
    use proptest::prelude::*;

    #[test]
    fn identical_files_produce_no_parts() {
        let data = b"identical content".as_slice();
        let digests = BlockDigestSet::from_bytes(data, 3);
        assert!(scan(data, &digests).is_empty());
    }

    #[test]
    fn tail_extension() {
        // dest "abc", source "abcdef": both blocks match, the new tail is a
        // single literal.
        let digests = BlockDigestSet::from_bytes(b"abc", 2);
        let parts = scan(b"abcdef", &digests);
        assert_eq!(parts, vec![DeltaPart::literal(3, 6)]);
        assert_eq!(apply_parts(b"abcdef", b"abc", &parts), b"abcdef");
    }

    #[test]
    fn in_file_shift_emits_move_before_literal() {
        // dest "test", source " test": the whole block is found one byte
        // further right, so it moves in place and the literal fills the hole.
        let digests = BlockDigestSet::from_bytes(b"test", 1);
        assert_eq!(digests.block_len, 5);
        let parts = scan(b" test", &digests);
        assert_eq!(
            parts,
            vec![
                DeltaPart { start: 0, end: 4, offset: 1 },
                DeltaPart::literal(0, 1),
            ]
        );
        assert_eq!(apply_parts(b" test", b"test", &parts), b" test");
    }

    #[test]
    fn changed_block_becomes_literal() {
        // dest "test" in two blocks ("tes", "t"); source "tesX2" differs in
        // the second block and grows.
        let digests = BlockDigestSet::from_bytes(b"test", 2);
        let parts = scan(b"tesX2", &digests);
        assert!(parts.iter().all(|p| !p.is_move()));
        assert_eq!(apply_parts(b"tesX2", b"test", &parts), b"tesX2");
    }

    #[test]
    fn zero_length_source_truncates_destination() {
        let digests = BlockDigestSet::from_bytes(b"old content", 2);
        let parts = scan(b"", &digests);
        assert_eq!(parts, vec![DeltaPart::literal(0, 11)]);
        assert_eq!(apply_parts(b"", b"old content", &parts), b"");
    }

    #[test]
    fn shorter_source_truncates_tail() {
        let digests = BlockDigestSet::from_bytes(b"abcdef", 2);
        // block_len = 4: blocks "abcd", "ef"
        let parts = scan(b"abcd", &digests);
        assert_eq!(apply_parts(b"abcd", b"abcdef", &parts), b"abcd");
    }

    #[test]
    fn moves_always_precede_literals() {
        let digests = BlockDigestSet::from_bytes(b"hello world, hello block", 4);
        let parts = scan(b"XXhello world, hello block", &digests);
        let first_literal = parts.iter().position(|p| !p.is_move());
        if let Some(fl) = first_literal {
            assert!(parts[fl..].iter().all(|p| !p.is_move()));
        }
        assert_eq!(
            apply_parts(b"XXhello world, hello block", b"hello world, hello block", &parts),
            b"XXhello world, hello block"
        );
    }

    #[test]
    fn empty_both_sides() {
        let digests = BlockDigestSet::from_bytes(b"", 1);
        assert!(scan(b"", &digests).is_empty());
    }

    proptest! {
        #[test]
        fn applying_parts_rebuilds_the_source(
            dest in proptest::collection::vec(any::<u8>(), 0..200),
            source in proptest::collection::vec(any::<u8>(), 0..200),
            n in 1u64..8,
        ) {
            let digests = BlockDigestSet::from_bytes(&dest, n);
            let parts = scan(&source, &digests);
            prop_assert_eq!(apply_parts(&source, &dest, &parts), source);
        }

        #[test]
        fn prefix_edit_keeps_shifted_blocks_as_moves(
            prefix in proptest::collection::vec(any::<u8>(), 1..8),
            body in proptest::collection::vec(any::<u8>(), 64..128),
        ) {
            let mut source = prefix.clone();
            source.extend_from_slice(&body);
            let digests = BlockDigestSet::from_bytes(&body, 4);
            let parts = scan(&source, &digests);
            prop_assert_eq!(apply_parts(&source, &body, &parts), source);
        }
    }
}
