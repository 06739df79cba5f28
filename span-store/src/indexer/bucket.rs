//! Per-writer pseudo-randomness. Neither type here is cryptographically secure, nor
//! meant to be: they only spread rows across keys.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU8, Ordering};

/// Hands out bucket numbers in `[0, buckets)` in rotating order. The starting point is
/// random so independent writers don't rotate in lockstep.
#[derive(Debug)]
pub struct BucketRoundRobin {
    current: AtomicU8,
    buckets: u8,
}

impl BucketRoundRobin {
    pub fn new(buckets: u8) -> Self {
        let buckets = buckets.max(1);
        Self::with_start(buckets, rand::thread_rng().gen_range(0..buckets))
    }

    pub fn with_start(buckets: u8, start: u8) -> Self {
        let buckets = buckets.max(1);
        Self {
            current: AtomicU8::new(start % buckets),
            buckets,
        }
    }

    pub fn buckets(&self) -> u8 {
        self.buckets
    }

    pub fn next(&self) -> u8 {
        let buckets = self.buckets;
        match self
            .current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some((cur + 1) % buckets)
            }) {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

/// Source of the `uniq` row column
#[derive(Debug)]
pub struct LockedRand(parking_lot::Mutex<SmallRng>);

impl LockedRand {
    pub fn new(seed: u64) -> Self {
        Self(parking_lot::Mutex::new(SmallRng::seed_from_u64(seed)))
    }

    pub fn from_time() -> Self {
        let seed = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default() as u64;
        Self::new(seed)
    }

    pub fn next_u32(&self) -> u32 {
        self.0.lock().gen()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn rotates_through_every_bucket() {
        let rr = BucketRoundRobin::with_start(10, 7);
        let first_round: Vec<u8> = (0..10).map(|_| rr.next()).collect();
        assert_eq!(first_round, vec![7, 8, 9, 0, 1, 2, 3, 4, 5, 6]);
        let second_round: Vec<u8> = (0..10).map(|_| rr.next()).collect();
        assert_eq!(first_round, second_round);
    }

    #[test]
    fn random_start_still_covers_all_buckets() {
        let rr = BucketRoundRobin::new(10);
        let seen: HashSet<u8> = (0..10).map(|_| rr.next()).collect();
        assert_eq!(seen.len(), 10);
        assert!(seen.iter().all(|b| *b < 10));
    }

    #[test]
    fn zero_buckets_degrades_to_one() {
        let rr = BucketRoundRobin::new(0);
        assert_eq!(rr.buckets(), 1);
        assert_eq!(rr.next(), 0);
        assert_eq!(rr.next(), 0);
    }

    #[test]
    fn concurrent_callers_share_the_rotation() {
        let rr = Arc::new(BucketRoundRobin::with_start(4, 0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rr = Arc::clone(&rr);
                std::thread::spawn(move || (0..100).map(|_| rr.next()).collect::<Vec<u8>>())
            })
            .collect();
        let mut counts = [0usize; 4];
        for h in handles {
            for b in h.join().unwrap() {
                counts[b as usize] += 1;
            }
        }
        assert_eq!(counts, [100; 4]);
    }

    #[test]
    fn seeded_rand_is_reproducible() {
        let a = LockedRand::new(42);
        let b = LockedRand::new(42);
        assert_eq!(a.next_u32(), b.next_u32());
    }
}
