//! A passthrough hasher for values that are already 64 bit hashes.
//! Used to feed pre-hashed kmers into hashmaps and into the probminhash
//! sketchers without rehashing.

use std::hash::Hasher;

#[derive(Default, Clone, Copy)]
pub struct NoHashHasher(u64);

impl Hasher for NoHashHasher {
    #[inline(always)]
    fn finish(&self) -> u64 {
        self.0
    }

    #[inline(always)]
    fn write(&mut self, bytes: &[u8]) {
        // only the 8 low bytes count, the value is supposed to be a hash already
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        self.0 = u64::from_le_bytes(buf);
    }

    #[inline(always)]
    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }

    #[inline(always)]
    fn write_u32(&mut self, i: u32) {
        self.0 = i as u64;
    }
}
