//! Adler-32 style rolling checksum for weak block matching.
//!
//! Two 16-bit sums over the current window: `s1` accumulates bytes (offset
//! by 1), `s2` accumulates prefix sums, both modulo 65521. The combined
//! value is `(s2 << 16) | s1`. The incremental operations are the contract
//! the delta scan depends on: `roll` slides the window by one byte, `shrink`
//! drops the trailing byte when the source runs out before the window does.

/// Largest prime smaller than 2^16.
const BASE: u32 = 65521;

/// Largest n such that 255·n·(n+1)/2 + (n+1)·(BASE−1) fits in u32.
const NMAX: usize = 5552;

/// Initial `s1` offset of the Adler-32 definition.
const OFFS: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollingSum {
    s1: u32,
    s2: u32,
    len: usize,
}

impl RollingSum {
    pub fn new() -> Self {
        Self {
            s1: OFFS,
            s2: 0,
            len: 0,
        }
    }

    /// Checksum of a complete byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut sum = Self::new();
        sum.update(data);
        sum
    }

    /// Feed bytes into the window.
    pub fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(NMAX) {
            for &b in chunk {
                self.s1 += u32::from(b);
                self.s2 += self.s1;
            }
            self.s1 %= BASE;
            self.s2 %= BASE;
        }
        self.len += data.len();
    }

    /// Slide the window one byte forward: drop `old` at the front, append
    /// `new` at the back. Window length is unchanged.
    pub fn roll(&mut self, old: u8, new: u8) {
        let n = self.len as i64;
        let s1 = (i64::from(self.s1) - i64::from(old) + i64::from(new)).rem_euclid(BASE as i64);
        let s2 = (i64::from(self.s2) - n * i64::from(old) + s1 - i64::from(OFFS))
            .rem_euclid(BASE as i64);
        self.s1 = s1 as u32;
        self.s2 = s2 as u32;
    }

    /// Drop `old` at the front without appending. Window length shrinks by
    /// one; used when the source is shorter than the remaining region.
    pub fn shrink(&mut self, old: u8) {
        let n = self.len as i64;
        let s1 = (i64::from(self.s1) - i64::from(old)).rem_euclid(BASE as i64);
        let s2 = (i64::from(self.s2) - n * i64::from(old) - i64::from(OFFS))
            .rem_euclid(BASE as i64);
        self.s1 = s1 as u32;
        self.s2 = s2 as u32;
        self.len -= 1;
    }

    /// Combined 32-bit checksum value.
    pub fn value(&self) -> u32 {
        (self.s2 << 16) | self.s1
    }

    /// Number of bytes currently in the window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One-shot weak checksum of a byte slice.
pub fn weak_checksum(data: &[u8]) -> u32 {
    RollingSum::from_bytes(data).value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_input_matches_adler_initial_value() {
        assert_eq!(weak_checksum(b""), 1);
    }

    #[test]
    fn known_value() {
        // zlib.adler32(b"Wikipedia") == 0x11E60398
        assert_eq!(weak_checksum(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn roll_matches_recompute() {
        let data = b"AHello World";
        let mut sum = RollingSum::from_bytes(data);
        sum.roll(b'A', b'!');
        assert_eq!(sum.value(), weak_checksum(b"Hello World!"));
    }

    #[test]
    fn shrink_matches_recompute() {
        let data = b"xabc";
        let mut sum = RollingSum::from_bytes(data);
        sum.shrink(b'x');
        assert_eq!(sum.len(), 3);
        assert_eq!(sum.value(), weak_checksum(b"abc"));
    }

    #[test]
    fn shrink_to_empty() {
        let mut sum = RollingSum::from_bytes(b"a");
        sum.shrink(b'a');
        assert_eq!(sum.len(), 0);
        assert_eq!(sum.value(), weak_checksum(b""));
    }

    proptest! {
        #[test]
        fn rolling_forward_equals_direct_compute(
            data in proptest::collection::vec(any::<u8>(), 2..512),
            window in 1usize..64,
        ) {
            let window = window.min(data.len() - 1);
            let mut sum = RollingSum::from_bytes(&data[..window]);
            for i in 0..data.len() - window {
                sum.roll(data[i], data[i + window]);
                prop_assert_eq!(
                    sum.value(),
                    weak_checksum(&data[i + 1..i + 1 + window])
                );
            }
        }

        #[test]
        fn shrinking_equals_direct_compute(
            data in proptest::collection::vec(any::<u8>(), 1..256),
        ) {
            let mut sum = RollingSum::from_bytes(&data);
            for i in 0..data.len() {
                sum.shrink(data[i]);
                prop_assert_eq!(sum.value(), weak_checksum(&data[i + 1..]));
            }
        }
    }
}
