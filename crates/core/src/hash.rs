//! Key hashing for the batch hash column.

use ahash::RandomState;
use core::hash::Hash;

// Fixed seeds keep the hash column identical across instances and restarts.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Hashes a join key into the 32-bit value stored in a batch's hash column.
#[inline]
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> i32 {
    let state = RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]);
    let full = state.hash_one(key);
    (full ^ (full >> 32)) as i32
}
