use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Seeded 64-bit fingerprint of a key: the only identity a key has on disk.
///
/// Stable across processes and builds. Distinct keys that collide are
/// indistinguishable to the store.
#[inline(always)]
pub fn fingerprint(key: &[u8], seed: u32) -> u64 {
    xxh3_64_with_seed(key, seed as u64)
}
