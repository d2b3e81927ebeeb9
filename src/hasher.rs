//! Deterministic pseudo-random sources: a linear-congruential generator and
//! the address hasher built on it.
//!
//! Both are part of the reproducibility contract. Two processes seeded the
//! same way must produce identical sequences, so the generator is spelled
//! out here rather than delegated to an RNG crate whose stream may change
//! between releases.

/// 48-bit linear-congruential generator with the classic drand48 constants.
#[derive(Clone, Debug)]
pub struct LinearCongruential {
    state: u64,
}

impl LinearCongruential {
    const MULTIPLIER: u64 = 0x5_deec_e66d;
    const INCREMENT: u64 = 0xb;
    const STATE_MASK: u64 = (1 << 48) - 1;

    pub fn new(seed: u64) -> Self {
        Self {
            state: seed & Self::STATE_MASK,
        }
    }

    /// Next draw: the high 32 bits of the 48-bit state.
    pub fn next(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT)
            & Self::STATE_MASK;
        self.state >> 16
    }

    /// A 63-bit non-negative key assembled from two draws. Keys generated by
    /// uncoordinated processes stay disjoint with high probability.
    pub fn next_key(&mut self) -> i64 {
        let high = self.next() & 0x7fff_ffff;
        let low = self.next();
        ((high << 32) | low) as i64
    }
}

/// Hashes a 32-bit address to a single byte through a seed-derived
/// permutation table. The same seed reproduces the same table, so a
/// function executed twice with the same inputs sees the same memory
/// defaults at the same addresses.
#[derive(Clone, Debug)]
pub struct AddressHasher {
    table: [u8; 256],
}

impl AddressHasher {
    pub fn new(seed: u64) -> Self {
        let mut lcg = LinearCongruential::new(seed);
        let mut table = [0u8; 256];
        for entry in table.iter_mut() {
            *entry = (lcg.next() % 256) as u8;
        }
        Self { table }
    }

    pub fn hash(&self, addr: u32) -> u8 {
        let mut acc = 0u8;
        for i in 0..4 {
            let byte = (addr >> (8 * i)) as u8;
            acc = self.table[usize::from(acc.wrapping_add(byte))];
        }
        acc
    }
}
