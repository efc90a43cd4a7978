//! First-sighting filter in front of the frequency sketch.
//!
//! A plain Bloom filter: the first time a key hash is seen it is recorded
//! here and the sketch is left untouched; only repeat sightings reach the
//! sketch. Since a large share of any realistic trace is one-hit wonders,
//! this keeps the sketch's 4-bit counters for keys that actually recur.
//!
//! The filter is flushed whenever the sketch ages, so "seen before" never
//! outlives the counters it was protecting.

/// Bloom-filter hash seeds (k = 4).
const BIT_SEEDS: [u64; 4] = [
    0x8AD8_A04C_E6B8_45D1,
    0xD6E8_FEB8_6659_FD93,
    0xA24B_AED4_963E_E407,
    0x9FB2_1C65_1E98_DF25,
];

/// A Bloom filter over key hashes with a power-of-two bit count.
pub(crate) struct Doorkeeper {
    words: Vec<u64>,
    /// Total bit count; always a power of two.
    bit_mask: usize,
}

impl Doorkeeper {
    /// Sizes the filter at ~8 bits per expected key (k = 4, ≈2% false
    /// positives), floored at one word.
    pub(crate) fn new(expected_keys: usize) -> Self {
        let bits = (expected_keys.saturating_mul(8)).next_power_of_two().max(64);
        Doorkeeper {
            words: vec![0u64; bits / 64],
            bit_mask: bits - 1,
        }
    }

    /// Records `h`. Returns `true` when `h` was (probably) already present,
    /// i.e. the sketch should now take the increment.
    #[inline]
    pub(crate) fn insert(&mut self, h: u64) -> bool {
        let seen = self.contains(h);
        if !seen {
            for &seed in &BIT_SEEDS {
                let bit = self.bit_of(h, seed);
                self.words[bit >> 6] |= 1u64 << (bit & 63);
            }
        }
        seen
    }

    /// Membership probe without mutation. False positives possible, false
    /// negatives not.
    #[inline]
    pub(crate) fn contains(&self, h: u64) -> bool {
        BIT_SEEDS.iter().all(|&seed| {
            let bit = self.bit_of(h, seed);
            (self.words[bit >> 6] >> (bit & 63)) & 1 == 1
        })
    }

    /// Forgets everything. Called when the sketch ages.
    pub(crate) fn clear(&mut self) {
        self.words.fill(0);
    }

    #[inline]
    fn bit_of(&self, h: u64, seed: u64) -> usize {
        (h.wrapping_mul(seed) >> 32) as usize & self.bit_mask
    }
}
