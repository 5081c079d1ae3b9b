// Two counting handshakes coordinate the Forward worker and the Backward
// worker (see the concurrency model in SPEC_FULL.md §5). Built on the
// futex-style primitive in `atomic_wait`, generalized from `AtomicBool`
// to a small counting semaphore so a release can wake a waiter blocked on
// any count above zero.
use crate::atomic_wait::platform::{wait_u32, wake_one_u32};
use std::sync::atomic::{AtomicU32, Ordering};

/// A counting semaphore: `acquire` blocks until the count is > 0, then
/// decrements it; `release` increments the count and wakes one waiter.
pub struct Handshake {
    count: AtomicU32,
}

impl Handshake {
    /// `initial` is load-bearing for `forward_gate`: starting it at 1 lets
    /// the first prune window proceed without a matching prior release.
    pub fn new(initial: u32) -> Self {
        Handshake {
            count: AtomicU32::new(initial),
        }
    }

    /// Block until a unit is available, then consume it.
    pub fn acquire(&self) {
        loop {
            let current = self.count.load(Ordering::Acquire);
            if current == 0 {
                wait_u32(&self.count, 0);
                continue;
            }
            if self
                .count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Make one unit available and wake a single waiter.
    pub fn release(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
        wake_one_u32(&self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquire_blocks_until_release() {
        let h = Arc::new(Handshake::new(0));
        let h2 = Arc::clone(&h);
        let worker = thread::spawn(move || {
            h2.acquire();
            42
        });
        thread::sleep(std::time::Duration::from_millis(20));
        h.release();
        assert_eq!(worker.join().unwrap(), 42);
    }

    #[test]
    fn initial_count_permits_first_acquire_without_release() {
        let h = Handshake::new(1);
        h.acquire(); // must not block
    }

    #[test]
    fn counts_accumulate_across_releases() {
        let h = Handshake::new(0);
        h.release();
        h.release();
        h.acquire();
        h.acquire(); // must not block, two units were banked
    }
}
