use std::f64::consts::LN_2;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// A fixed-size Bloom filter with a seeded, rejection-sampled multi-hash
/// index generator.
///
/// Unlike a textbook implementation that uses `k` independent hash
/// *functions*, this filter derives all `k` indices from repeated seeded
/// applications of a single 64-bit hash (XXH3), matching the approach taken
/// by the CAR Mirror reference implementation. The bit count `m` is always
/// rounded up to the next power of two, so picking an index from a 64-bit
/// hash is a cheap mask-and-shift instead of a modulo, and the rejection
/// sampling loop in `indices_for` almost never has to reseed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// Number of bits, always a power of two, at least `min_bits`.
    m: u64,
    /// Number of hash indices per element, at least 1.
    k: u64,
    bits: Vec<u8>,
}

/// The minimum number of bits a filter is allowed to have, regardless of
/// requested capacity. Keeps small-`n` sessions (e.g. a handful of roots)
/// from ending up with a degenerate, high-false-positive filter.
pub const DEFAULT_MIN_BITS: u64 = 1024;

impl BloomFilter {
    /// Build an empty filter sized for `capacity` elements at target false
    /// positive probability `fpp`, per spec.md §4.1:
    ///
    /// `m = ceil(-n * ln(p) / (ln 2)^2)`, rounded up to the next power of
    /// two (with a floor of `min_bits`), and `k = ceil((m/n) * ln 2)`.
    pub fn new_with_fpp(capacity: u64, fpp: f64, min_bits: u64) -> Self {
        let n = capacity.max(1);
        let fpp = fpp.clamp(f64::MIN_POSITIVE, 0.999);

        let raw_m = (-(n as f64) * fpp.ln() / (LN_2 * LN_2)).ceil() as u64;
        let m = raw_m.max(min_bits).max(1).next_power_of_two();

        let raw_k = ((m as f64 / n as f64) * LN_2).ceil() as u64;
        let k = raw_k.max(1);

        Self::new(m, k)
    }

    /// Build an empty filter with explicit `m` (bit count) and `k` (hash
    /// count). `m` is clamped to at least 1 and rounded up to the next
    /// power of two; `k` is clamped to at least 1.
    pub fn new(m: u64, k: u64) -> Self {
        let m = m.max(1).next_power_of_two();
        let k = k.max(1);
        let num_bytes = m.div_ceil(8) as usize;
        Self {
            m,
            k,
            bits: vec![0u8; num_bytes],
        }
    }

    /// Reconstruct a filter from its raw bit array plus `m`/`k`. `m` here is
    /// the number of bits the `bits` slice actually encodes; it's re-derived
    /// from the slice length rather than trusted blindly, since `bits.len()`
    /// is the source of truth for a deserialized filter.
    pub fn from_bytes(bits: impl Into<Vec<u8>>, k: u64) -> Self {
        let bits = bits.into();
        let m = ((bits.len() as u64) * 8).max(1).next_power_of_two();
        let mut bits = bits;
        bits.resize(m.div_ceil(8) as usize, 0);
        Self {
            m,
            k: k.max(1),
            bits,
        }
    }

    /// An empty filter that contains nothing and whose `test` always
    /// returns `false`. Used as the "no estimate" sentinel internally; the
    /// wire representation of "no estimate" is `bk = 0, bb = empty` (see
    /// `messages::Bloom`).
    pub fn empty() -> Self {
        Self::new(1, 1)
    }

    /// Number of bits in the filter (always a power of two).
    pub fn m(&self) -> u64 {
        self.m
    }

    /// Number of hash indices used per element.
    pub fn k(&self) -> u64 {
        self.k
    }

    /// The raw bit array.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Insert `x` into the filter, setting `k` bits.
    pub fn add(&mut self, x: impl AsRef<[u8]>) {
        for idx in self.indices_for(x.as_ref()) {
            self.set_bit(idx);
        }
    }

    /// Test whether all `k` bits for `x` are set. False positives are
    /// possible; false negatives are not.
    pub fn test(&self, x: impl AsRef<[u8]>) -> bool {
        self.indices_for(x.as_ref()).all(|idx| self.get_bit(idx))
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u64 {
        self.bits.iter().map(|byte| byte.count_ones() as u64).sum()
    }

    /// Fraction of bits that are set. Used to decide when to rebuild the
    /// filter at a larger size (spec.md §4.7: rebuild above 0.5 saturation).
    pub fn saturation(&self) -> f64 {
        self.count_ones() as f64 / self.m as f64
    }

    /// Estimate the number of distinct elements that have been inserted,
    /// from the fraction of bits set.
    pub fn approx_size(&self) -> f64 {
        let ones = self.count_ones() as f64;
        if ones >= self.m as f64 {
            // Fully saturated; the estimator's log blows up. Return the
            // largest finite estimate instead of NaN/infinity.
            return f64::MAX;
        }
        -((self.m as f64 / self.k as f64) * (1.0 - ones / self.m as f64).ln())
    }

    /// The probability that `test` returns `true` for an element that was
    /// never `add`ed, assuming `n` elements have been inserted uniformly at
    /// random.
    pub fn fpp(&self, n: u64) -> f64 {
        let exp = -((self.k as f64) * (n as f64) / (self.m as f64));
        (1.0 - exp.exp()).powf(self.k as f64)
    }

    /// Merge another filter's bits into this one (set union). Both filters
    /// must share `m` and `k`; returns `false` (no-op) otherwise.
    #[must_use]
    pub fn merge(&mut self, other: &BloomFilter) -> bool {
        if self.m != other.m || self.k != other.k {
            return false;
        }
        for (byte, other_byte) in self.bits.iter_mut().zip(other.bits.iter()) {
            *byte |= other_byte;
        }
        true
    }

    /// Rebuild this filter at double its current bit count, re-inserting
    /// nothing (callers are expected to re-add known elements since the
    /// filter doesn't retain the original elements, only their hashes).
    /// Used when `saturation()` crosses the configured threshold.
    pub fn doubled(&self) -> Self {
        Self::new(self.m * 2, self.k)
    }

    fn set_bit(&mut self, idx: u64) {
        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        self.bits[byte] |= 1 << bit;
    }

    fn get_bit(&self, idx: u64) -> bool {
        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        (self.bits[byte] >> bit) & 1 == 1
    }

    /// Produce `k` bit indices for `x`, via rejection sampling over
    /// `log2(m)`-bit windows of repeated seeded 64-bit hashes, per
    /// spec.md §4.1.
    fn indices_for<'a>(&'a self, x: &'a [u8]) -> impl Iterator<Item = u64> + 'a {
        let shift = self.m.trailing_zeros();
        let mask = self.m - 1;

        let mut seed = 0u64;
        let mut produced = 0u64;

        std::iter::from_fn(move || {
            if produced >= self.k {
                return None;
            }

            loop {
                let hv = xxh3_64_with_seed(x, seed);
                seed += 1;

                let mut remaining = hv;
                let mut bits_left = 64u32;
                while bits_left >= shift {
                    let idx = remaining & mask;
                    // Always true when m is a power of two, per spec.md
                    // §4.1; kept as a real check so a future non-power-of-two
                    // `m` (there isn't one - `new`/`new_with_fpp` always
                    // round up) degrades safely instead of panicking.
                    if idx < self.m {
                        produced += 1;
                        return Some(idx);
                    }
                    remaining >>= shift;
                    bits_left -= shift;
                }
                // Exhausted all windows of this hash without a usable
                // index; reseed and try again.
            }
        })
    }
}

// `BloomFilter` itself carries no `Serialize`/`Deserialize` impl: the wire
// form is `messages::Bloom { hash_count, bytes }`, which carries `k`
// alongside the raw bits explicitly (`Bloom::into_filter`/`from_filter`)
// instead of trying to recover it from a bits-only encoding.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_degenerate_parameters() {
        let filter = BloomFilter::new(0, 0);
        assert_eq!(filter.m(), 1);
        assert_eq!(filter.k(), 1);
    }

    #[test]
    fn m_is_always_a_power_of_two() {
        for m in [1, 2, 3, 100, 1023, 1024, 1025] {
            let filter = BloomFilter::new(m, 3);
            assert!(filter.m().is_power_of_two());
            assert!(filter.m() >= m);
        }
    }

    #[test]
    fn add_then_test_has_no_false_negatives() {
        let mut filter = BloomFilter::new_with_fpp(1000, 0.001, DEFAULT_MIN_BITS);
        let elems: Vec<Vec<u8>> = (0..1000u32).map(|i| i.to_be_bytes().to_vec()).collect();
        for e in &elems {
            filter.add(e);
        }
        for e in &elems {
            assert!(filter.test(e), "no false negatives allowed");
        }
    }

    #[test]
    fn false_positive_rate_is_roughly_as_configured() {
        let target_fpp = 0.01;
        let n = 2000u64;
        let mut filter = BloomFilter::new_with_fpp(n, target_fpp, DEFAULT_MIN_BITS);
        for i in 0..n {
            filter.add(i.to_be_bytes());
        }

        let mut false_positives = 0u64;
        let trials = 20_000u64;
        for i in n..(n + trials) {
            if filter.test(i.to_be_bytes()) {
                false_positives += 1;
            }
        }

        let observed = false_positives as f64 / trials as f64;
        // Generous slack: this is a statistical test, not an exact bound.
        assert!(
            observed < target_fpp * 5.0,
            "observed fpp {observed} too far from target {target_fpp}"
        );
    }

    #[test]
    fn from_bytes_round_trips_test() {
        let mut filter = BloomFilter::new_with_fpp(100, 0.01, DEFAULT_MIN_BITS);
        filter.add(b"hello");
        filter.add(b"world");

        let reconstructed = BloomFilter::from_bytes(filter.as_bytes().to_vec(), filter.k());
        assert!(reconstructed.test(b"hello"));
        assert!(reconstructed.test(b"world"));
        assert_eq!(reconstructed.test(b"other"), filter.test(b"other"));
    }

    #[test]
    fn merge_requires_matching_parameters() {
        let mut a = BloomFilter::new(1024, 3);
        let b = BloomFilter::new(2048, 3);
        assert!(!a.merge(&b));

        let mut c = BloomFilter::new(1024, 3);
        c.add(b"x");
        let mut d = BloomFilter::new(1024, 3);
        d.add(b"y");
        assert!(c.merge(&d));
        assert!(c.test(b"x"));
        assert!(c.test(b"y"));
    }

    #[test]
    fn saturation_crosses_threshold_and_doubles() {
        let mut filter = BloomFilter::new(1024, 2);
        for i in 0..2000u32 {
            filter.add(i.to_be_bytes());
        }
        assert!(filter.saturation() > 0.5);

        let doubled = filter.doubled();
        assert_eq!(doubled.m(), filter.m() * 2);
    }

    #[test]
    fn empty_filter_contains_nothing() {
        let filter = BloomFilter::empty();
        assert!(!filter.test(b"anything"));
    }
}
