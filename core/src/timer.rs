use std::time::Instant;

#[derive(Debug)]
struct Entry<K> {
    at: Instant,
    seq: u64,
    key: K,
}

/// Deferred continuations, fired in deadline order. Entries with the same
/// deadline fire in the order they were scheduled.
#[derive(Debug)]
pub struct Timers<K> {
    entries: Vec<Entry<K>>,
    next_seq: u64,
}

impl<K> Default for Timers<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<K> Timers<K> {
    pub fn schedule(&mut self, at: Instant, key: K) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry { at, seq, key });
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.at).min()
    }

    /// Remove and return the earliest entry due at `now`, with its deadline.
    pub fn pop_due(&mut self, now: Instant) -> Option<(Instant, K)> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.at <= now)
            .min_by_key(|(_, e)| (e.at, e.seq))
            .map(|(i, _)| i)?;
        let entry = self.entries.swap_remove(index);
        Some((entry.at, entry.key))
    }

    pub fn cancel(&mut self, mut matches: impl FnMut(&K) -> bool) {
        self.entries.retain(|e| !matches(&e.key));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
