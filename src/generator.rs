//! Deterministic workload generator
//!
//! Produces the nested object-key layout written by backup software that
//! stores its repository in object storage:
//!
//! ```text
//! <uuid1>/<uuid2>/blocks/<hex16>/<uint64>.<hex16>.<suffix>.blk
//! ```
//!
//! Every value is derived from a 64-bit state mixed with the murmur3 `fmix64`
//! finalizer, so two generators created from the same seed always emit the
//! same keys in the same order. Lanes are seeded `initial_seed + lane`.

use serde::{Deserialize, Serialize};

use crate::constants::{BLOCK_EXTENSION, DEFAULT_FOLDER_CAPACITY, HEAD_BLOCK_SUFFIX};

/// Seeded pseudo-random key generator. Not cryptographic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadGenerator {
    state: u64,
}

/// Folder fan-out bounds for one generated batch.
///
/// `f1 x f2 x f3` is the largest number of objects below one top-level folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FolderCapacity {
    #[serde(rename = "f1", default = "default_capacity")]
    pub folder1: u16,
    #[serde(rename = "f2", default = "default_capacity")]
    pub folder2: u16,
    #[serde(rename = "f3", default = "default_capacity")]
    pub folder3: u16,
}

fn default_capacity() -> u16 {
    DEFAULT_FOLDER_CAPACITY
}

impl FolderCapacity {
    pub fn new(folder1: u16, folder2: u16, folder3: u16) -> Self {
        Self { folder1, folder2, folder3 }
    }
}

impl Default for FolderCapacity {
    fn default() -> Self {
        Self::new(DEFAULT_FOLDER_CAPACITY, DEFAULT_FOLDER_CAPACITY, DEFAULT_FOLDER_CAPACITY)
    }
}

impl WorkloadGenerator {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generator for lane/worker `index`, seeded `initial_seed + index`.
    pub fn for_worker(initial_seed: u64, index: usize) -> Self {
        Self::new(initial_seed.wrapping_add(index as u64))
    }

    /// Current state without advancing.
    pub fn state(&self) -> u64 {
        self.state
    }

    /// Mix the state and return the new value.
    pub fn next(&mut self) -> u64 {
        let mut h = self.state;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
        self.state = h;
        h
    }

    /// Return the current state, then advance.
    pub fn next_u64(&mut self) -> u64 {
        let h = self.state;
        self.next();
        h
    }

    /// One draw as 16 lowercase hex digits.
    pub fn next_hex16(&mut self) -> String {
        format!("{:016x}", self.next_u64())
    }

    /// Canonical 8-4-4-4-12 identifier.
    ///
    /// The high half comes from the current state, the low half from the
    /// freshly mixed one; the state is left at the second value.
    pub fn next_uuid(&mut self) -> String {
        let p1 = self.state;
        let p2 = self.next();
        format!(
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (p1 >> 32) & 0xffff_ffff,
            (p1 >> 16) & 0xffff,
            p1 & 0xffff,
            p2 & 0xffff,
            p2 >> 16
        )
    }

    /// One draw split into four 16-bit values, most significant first.
    pub fn next_u16s(&mut self) -> (u16, u16, u16, u16) {
        let h = self.next_u64();
        ((h >> 48) as u16, (h >> 32) as u16, (h >> 16) as u16, h as u16)
    }

    /// Generate one folder tree worth of keys.
    ///
    /// Draws the fan-out of the three folder levels (each in `[1, maxN]`) and
    /// enumerates every combination outer to inner. The first key of each
    /// innermost folder carries the all-zero head suffix.
    ///
    /// Bounds must be non-zero; config validation enforces a minimum of 2.
    pub fn next_key_batch(&mut self, max_folder1: u16, max_folder2: u16, max_folder3: u16) -> Vec<String> {
        let (r1, r2, r3, _) = self.next_u16s();
        let r1 = 1 + r1 % max_folder1;
        let r2 = 1 + r2 % max_folder2;
        let r3 = 1 + r3 % max_folder3;

        let mut keys = Vec::with_capacity(r1 as usize * r2 as usize * r3 as usize);
        for _ in 0..r1 {
            for _ in 0..r2 {
                for x in 0..r3 {
                    let mut key = format!(
                        "{}/{}/blocks/{}/{}.{}.",
                        self.next_uuid(),
                        self.next_uuid(),
                        self.next_hex16(),
                        self.next_u64(),
                        self.next_hex16()
                    );
                    if x == 0 {
                        key.push_str(HEAD_BLOCK_SUFFIX);
                    } else {
                        key.push_str(&self.next_hex16());
                    }
                    key.push_str(BLOCK_EXTENSION);
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// [`next_key_batch`](Self::next_key_batch) with bounds taken from a [`FolderCapacity`].
    pub fn next_batch(&mut self, capacity: FolderCapacity) -> Vec<String> {
        self.next_key_batch(capacity.folder1, capacity.folder2, capacity.folder3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const GOLDEN_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

    #[test]
    fn test_mixer_sequence() {
        let mut g = WorkloadGenerator::new(1);
        assert_eq!(g.next(), 0xb456_bcfc_34c2_cb2c);
        assert_eq!(g.next(), 0x7d6e_4ac3_8b2b_1be2);
        assert_eq!(g.next(), 0x5ab6_3ad5_4535_5d6a);
    }

    #[test]
    fn test_hex16_returns_state_before_advancing() {
        let mut g = WorkloadGenerator::new(1);
        assert_eq!(g.next_hex16(), "0000000000000001");
        assert_eq!(g.next_hex16(), "b456bcfc34c2cb2c");
    }

    #[test]
    fn test_uuid_format() {
        let mut g = WorkloadGenerator::new(1);
        let uuid = g.next_uuid();
        assert_eq!(uuid, "00000000-0000-0001-cb2c-b456bcfc34c2");
        let groups: Vec<usize> = uuid.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert_eq!(g.state(), 0xb456_bcfc_34c2_cb2c);
    }

    #[test]
    fn test_golden_batch() {
        let mut g = WorkloadGenerator::new(GOLDEN_SEED);
        let keys = g.next_key_batch(4, 3, 5);
        assert_eq!(keys.len(), 8);
        assert_eq!(
            keys[0],
            "9ca066f1-a4ab-2eea-18dc-6393d51c06c6/6393d51c-06c6-18dc-3920-365afc61535b/blocks/\
             365afc61535b3920/10404957783723206165.2b875fe90b264f7c.00000000000000000000000000000000.blk"
        );
        assert_eq!(
            keys[1],
            "1e584314-7de7-bda8-592c-b1655f32e623/b1655f32-e623-592c-e63b-6a69b859124d/blocks/\
             6a69b859124de63b/15711765862973460737.f28323175c7cb482.8ccea78a00cb7e55.blk"
        );
        assert_eq!(g.state(), 8_965_804_588_059_683_287);
    }

    #[test]
    fn test_batches_are_deterministic() {
        let mut a = WorkloadGenerator::new(12345);
        let mut b = WorkloadGenerator::new(12345);
        for _ in 0..5 {
            assert_eq!(a.next_key_batch(6, 7, 8), b.next_key_batch(6, 7, 8));
        }
    }

    #[test]
    fn test_batch_size_matches_drawn_fanout() {
        let mut g = WorkloadGenerator::new(GOLDEN_SEED);
        for _ in 0..20 {
            let (r1, r2, r3, _) = g.clone().next_u16s();
            let expected = (1 + r1 % 9) as usize * (1 + r2 % 5) as usize * (1 + r3 % 7) as usize;
            assert_eq!(g.next_key_batch(9, 5, 7).len(), expected);
        }
    }

    #[test]
    fn test_one_head_block_per_inner_folder() {
        let mut g = WorkloadGenerator::new(GOLDEN_SEED);
        let (_, _, r3, _) = g.clone().next_u16s();
        let inner = (1 + r3 % 5) as usize;
        let keys = g.next_key_batch(4, 3, 5);

        for (i, key) in keys.iter().enumerate() {
            let suffix = key
                .strip_suffix(BLOCK_EXTENSION)
                .and_then(|k| k.rsplit('.').next())
                .unwrap();
            if i % inner == 0 {
                assert_eq!(suffix, HEAD_BLOCK_SUFFIX, "key {} should be a head block", i);
            } else {
                assert_eq!(suffix.len(), 16);
                assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
                assert_ne!(suffix, "0000000000000000");
            }
        }
    }

    #[test]
    fn test_key_layout() {
        let mut g = WorkloadGenerator::new(GOLDEN_SEED);
        for key in g.next_key_batch(4, 3, 5) {
            let parts: Vec<&str> = key.split('/').collect();
            assert_eq!(parts.len(), 5, "{}", key);
            assert_eq!(parts[0].len(), 36);
            assert_eq!(parts[1].len(), 36);
            assert_eq!(parts[2], "blocks");
            assert_eq!(parts[3].len(), 16);
            let fields: Vec<&str> = parts[4].split('.').collect();
            assert_eq!(fields.len(), 4);
            assert!(fields[0].parse::<u64>().is_ok());
            assert_eq!(fields[1].len(), 16);
            assert_eq!(fields[3], "blk");
        }
    }

    #[test]
    fn test_distinct_workers_produce_distinct_keys() {
        let capacity = FolderCapacity::new(10, 10, 10);
        let mut seen = HashSet::new();
        for worker in 0..4 {
            let mut g = WorkloadGenerator::for_worker(GOLDEN_SEED, worker);
            for _ in 0..3 {
                for key in g.next_batch(capacity) {
                    assert!(seen.insert(key), "duplicate key across workers");
                }
            }
        }
    }
}
