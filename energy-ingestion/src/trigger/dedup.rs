use std::collections::{HashSet, VecDeque};

/// Bounded memory of objects already ingested, keyed by name and content
/// digest. Oldest entries are evicted first; a capacity of zero disables it.
#[derive(Debug)]
pub struct RecentObjects {
    capacity: usize,
    order: VecDeque<(String, blake3::Hash)>,
    seen: HashSet<(String, blake3::Hash)>,
}

impl RecentObjects {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            seen: HashSet::with_capacity(capacity.min(1024)),
        }
    }

    pub fn contains(&self, object: &str, digest: &blake3::Hash) -> bool {
        self.seen.contains(&(object.to_string(), *digest))
    }

    pub fn insert(&mut self, object: &str, digest: blake3::Hash) {
        if self.capacity == 0 {
            return;
        }
        let key = (object.to_string(), digest);
        if !self.seen.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}
