//! Bounded memory of recently seen message fingerprints

use statbot_ipc::Fingerprint;
use std::collections::{HashSet, VecDeque};

pub const DEDUP_SOFT_CAP: usize = 200;
pub const DEDUP_EVICT_BATCH: usize = 100;

/// Insertion-ordered set. Reaching the cap drops the oldest batch at once, so
/// the footprint saw-tooths between `cap - batch` and `cap`.
///
/// A fingerprint evicted here is accepted again if the source redelivers it.
pub struct DedupCache {
    order: VecDeque<Fingerprint>,
    seen: HashSet<Fingerprint>,
    cap: usize,
    evict_batch: usize,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_limits(DEDUP_SOFT_CAP, DEDUP_EVICT_BATCH)
    }

    pub fn with_limits(cap: usize, evict_batch: usize) -> Self {
        let cap = cap.max(1);
        Self {
            order: VecDeque::with_capacity(cap),
            seen: HashSet::with_capacity(cap),
            cap,
            evict_batch: evict_batch.clamp(1, cap),
        }
    }

    pub fn has(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Returns `false` if the fingerprint was already present.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        if self.seen.contains(&fingerprint) {
            return false;
        }
        if self.order.len() >= self.cap {
            self.evict_oldest();
        }
        self.seen.insert(fingerprint.clone());
        self.order.push_back(fingerprint);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn evict_oldest(&mut self) {
        for _ in 0..self.evict_batch {
            match self.order.pop_front() {
                Some(old) => {
                    self.seen.remove(&old);
                }
                None => break,
            }
        }
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::DedupCache;
    use statbot_ipc::Fingerprint;

    fn fp(n: usize) -> Fingerprint {
        Fingerprint {
            conversation_id: "C1".to_string(),
            text: format!("message {}", n),
            observed_at: n as i64,
        }
    }

    #[test]
    fn second_insert_of_same_fingerprint_is_rejected() {
        let mut cache = DedupCache::new();
        assert!(!cache.has(&fp(1)));
        assert!(cache.insert(fp(1)));
        assert!(cache.has(&fp(1)));
        assert!(!cache.insert(fp(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn exceeding_cap_evicts_oldest_hundred() {
        let mut cache = DedupCache::new();
        for n in 0..201 {
            assert!(cache.insert(fp(n)));
        }

        assert_eq!(cache.len(), 101);
        let forgotten = (0..201).filter(|n| !cache.has(&fp(*n))).count();
        assert_eq!(forgotten, 100);
        assert!((0..100).all(|n| !cache.has(&fp(n))));
        assert!((100..201).all(|n| cache.has(&fp(n))));
    }

    #[test]
    fn memory_saw_tooths_between_half_and_full() {
        let mut cache = DedupCache::new();
        let mut peak = 0;
        for n in 0..1000 {
            cache.insert(fp(n));
            peak = peak.max(cache.len());
            assert!(cache.len() <= 200);
        }
        assert_eq!(peak, 200);
    }

    #[test]
    fn evicted_fingerprint_is_accepted_again() {
        let mut cache = DedupCache::with_limits(4, 2);
        for n in 0..5 {
            cache.insert(fp(n));
        }
        assert!(!cache.has(&fp(0)));
        assert!(cache.insert(fp(0)));
    }
}
