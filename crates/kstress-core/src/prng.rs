//! Multiply-with-carry pseudo-random generator
//!
//! Fast, non-cryptographic and fully reproducible: two generators seeded
//! with the same `(w, z)` pair produce the same stream bit for bit. Every
//! worker owns its own `Mwc` (forked workers get a copy of the parent's
//! state and reseed it), there is no global generator.
//!
//! The 16, 8 and 1 bit generators hand out the unused parts of the last
//! 32-bit draw before drawing again. Any explicit seeding flushes those
//! caches so the stream after `set_seed` never depends on what came before.

/// Default `w` seed used when random seeding is off
pub const DEFAULT_SEED_W: u32 = 521_288_629;

/// Default `z` seed used when random seeding is off
pub const DEFAULT_SEED_Z: u32 = 362_436_069;

/// `z` values the MWC recurrence never leaves
const DEGENERATE_Z: [u32; 2] = [0, 0x9068_ffff];

/// `w` values the MWC recurrence never leaves
const DEGENERATE_W: [u32; 2] = [0, 0x464f_ffff];

/// True when either half of a `(w, z)` seed is stuck at a fixed point
pub fn is_degenerate_seed(w: u32, z: u32) -> bool {
    DEGENERATE_W.contains(&w) || DEGENERATE_Z.contains(&z)
}

/// Upper bound on draws discarded after a reseed
const RESEED_DISCARD_MOD: u32 = 1733;

/// Filename-safe alphabet for random strings (64 symbols)
pub const STRING_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Unused bits left over from a 32-bit draw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BitCache {
    /// Values still available in `saved`
    count: u32,
    /// Remaining bits, consumed from the low end
    saved: u32,
}

impl BitCache {
    #[inline]
    fn take(&mut self, width: u32, per_draw: u32, refill: impl FnOnce() -> u32) -> u32 {
        if self.count == 0 {
            self.saved = refill();
            self.count = per_draw;
        }
        self.count -= 1;
        let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
        let val = self.saved & mask;
        self.saved = self.saved.checked_shr(width).unwrap_or(0);
        val
    }
}

/// Multiply-with-carry generator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mwc {
    z: u32,
    w: u32,
    cache16: BitCache,
    cache8: BitCache,
    cache1: BitCache,
}

impl Default for Mwc {
    fn default() -> Self {
        Self::new()
    }
}

impl Mwc {
    /// Generator at the fixed default seeds
    pub const fn new() -> Self {
        Self::with_seed(DEFAULT_SEED_W, DEFAULT_SEED_Z)
    }

    /// Generator at an explicit seed
    pub const fn with_seed(w: u32, z: u32) -> Self {
        Self {
            z,
            w,
            cache16: BitCache { count: 0, saved: 0 },
            cache8: BitCache { count: 0, saved: 0 },
            cache1: BitCache { count: 0, saved: 0 },
        }
    }

    /// Set the seed and flush all bit caches
    pub fn set_seed(&mut self, w: u32, z: u32) {
        self.w = w;
        self.z = z;
        self.flush();
    }

    /// Current `(w, z)` seed pair
    #[inline]
    pub fn get_seed(&self) -> (u32, u32) {
        (self.w, self.z)
    }

    /// Return to the fixed default seeds (reproducible runs)
    pub fn reset(&mut self) {
        self.set_seed(DEFAULT_SEED_W, DEFAULT_SEED_Z);
    }

    /// Drop any cached sub-word bits
    #[inline]
    pub fn flush(&mut self) {
        self.cache16 = BitCache::default();
        self.cache8 = BitCache::default();
        self.cache1 = BitCache::default();
    }

    /// Fold environmental entropy into a fresh seed
    ///
    /// Each source is run through a 64-bit finalizer before being folded
    /// into `z` or `w`, so sources with few changing bits (a PID, a load
    /// average) still move every seed bit. Degenerate seeds fall back to the
    /// defaults. The generator then discards `z % 1733` draws.
    pub fn reseed_with(&mut self, entropy: &[u64]) {
        let mut z = 0u64;
        let mut w = 0u64;
        for (i, &e) in entropy.iter().enumerate() {
            let h = mix64(e ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            if i & 1 == 0 {
                z ^= h;
            } else {
                w ^= h.rotate_left(17);
            }
        }
        let mut z = (z ^ (z >> 32)) as u32;
        let mut w = (w ^ (w >> 32)) as u32;
        if DEGENERATE_Z.contains(&z) {
            z = DEFAULT_SEED_Z;
        }
        if DEGENERATE_W.contains(&w) {
            w = DEFAULT_SEED_W;
        }
        self.set_seed(w, z);

        let discard = self.z % RESEED_DISCARD_MOD;
        for _ in 0..discard {
            self.next_u32();
        }
    }

    /// Next 32-bit value
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.z = 36969u32
            .wrapping_mul(self.z & 0xffff)
            .wrapping_add(self.z >> 16);
        self.w = 18000u32
            .wrapping_mul(self.w & 0xffff)
            .wrapping_add(self.w >> 16);
        (self.z << 16).wrapping_add(self.w)
    }

    /// Next 64-bit value, high word drawn first
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let hi = self.next_u32() as u64;
        let lo = self.next_u32() as u64;
        (hi << 32) | lo
    }

    /// Next 16-bit value (two per 32-bit draw)
    #[inline]
    pub fn next_u16(&mut self) -> u16 {
        let mut cache = self.cache16;
        let v = cache.take(16, 2, || self.next_u32()) as u16;
        self.cache16 = cache;
        v
    }

    /// Next 8-bit value (four per 32-bit draw)
    #[inline]
    pub fn next_u8(&mut self) -> u8 {
        let mut cache = self.cache8;
        let v = cache.take(8, 4, || self.next_u32()) as u8;
        self.cache8 = cache;
        v
    }

    /// Next single bit (thirty-two per 32-bit draw)
    #[inline]
    pub fn next_bit(&mut self) -> bool {
        let mut cache = self.cache1;
        let v = cache.take(1, 32, || self.next_u32()) != 0;
        self.cache1 = cache;
        v
    }

    /// Uniform value in `[0, max)`, `0` when `max < 2`
    #[inline]
    pub fn bounded_u8(&mut self, max: u8) -> u8 {
        if max < 2 {
            return 0;
        }
        let mask = all_ones_above(u64::from(max - 1)) as u8;
        loop {
            let v = self.next_u8() & mask;
            if v < max {
                return v;
            }
        }
    }

    /// Uniform value in `[0, max)`, `0` when `max < 2`
    #[inline]
    pub fn bounded_u16(&mut self, max: u16) -> u16 {
        if max < 2 {
            return 0;
        }
        let mask = all_ones_above(u64::from(max - 1)) as u16;
        loop {
            let v = self.next_u16() & mask;
            if v < max {
                return v;
            }
        }
    }

    /// Uniform value in `[0, max)`, `0` when `max < 2`
    #[inline]
    pub fn bounded_u32(&mut self, max: u32) -> u32 {
        if max < 2 {
            return 0;
        }
        let mask = all_ones_above(u64::from(max - 1)) as u32;
        loop {
            let v = self.next_u32() & mask;
            if v < max {
                return v;
            }
        }
    }

    /// Uniform value in `[0, max)`, `0` when `max < 2`
    #[inline]
    pub fn bounded_u64(&mut self, max: u64) -> u64 {
        if max < 2 {
            return 0;
        }
        let mask = all_ones_above(max - 1);
        loop {
            let v = self.next_u64() & mask;
            if v < max {
                return v;
            }
        }
    }

    /// Fill `buf` with random bytes
    pub fn fill_bytes(&mut self, buf: &mut [u8]) {
        let mut chunks = buf.chunks_exact_mut(4);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.next_u32().to_le_bytes());
        }
        for b in chunks.into_remainder() {
            *b = self.next_u8();
        }
    }

    /// Fill `buf` with filename-safe characters from `STRING_ALPHABET`
    pub fn fill_random_string(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = STRING_ALPHABET[(self.next_u8() & 63) as usize];
        }
    }

    /// Random filename-safe string of `len` characters
    pub fn random_string(&mut self, len: usize) -> String {
        let mut buf = vec![0u8; len];
        self.fill_random_string(&mut buf);
        // Alphabet is ASCII
        buf.into_iter().map(char::from).collect()
    }
}

/// Smallest all-ones mask covering `v`
#[inline]
const fn all_ones_above(v: u64) -> u64 {
    if v == 0 {
        0
    } else {
        u64::MAX >> v.leading_zeros()
    }
}

/// 64-bit finalizer (splitmix64)
#[inline]
const fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
