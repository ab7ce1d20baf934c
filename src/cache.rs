//! Per-device result cache for idempotent reads.
//!
//! Entries are keyed by the rendered read request. An entry is either an
//! in-flight handle, which concurrent readers share, or a resolved value.
//! There is no time-based expiry; only writes through the normal set path
//! invalidate.

use crate::value::Value;
use std::collections::HashMap;

/// Lookup result.
#[derive(Debug)]
pub enum CacheState<'a, H> {
    NotCached,
    InFlight(&'a H),
    Resolved(&'a Value),
}

#[derive(Debug)]
enum Entry<H> {
    InFlight { ticket: u64, handle: H },
    Resolved(Value),
}

#[derive(Debug)]
pub struct Cache<H> {
    entries: HashMap<String, Entry<H>>,
    next_ticket: u64,
}

impl<H> Default for Cache<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_ticket: 0,
        }
    }
}

impl<H> Cache<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &str) -> CacheState<'_, H> {
        match self.entries.get(key) {
            None => CacheState::NotCached,
            Some(Entry::InFlight { handle, .. }) => CacheState::InFlight(handle),
            Some(Entry::Resolved(value)) => CacheState::Resolved(value),
        }
    }

    /// Record an outstanding request. The returned ticket must be presented
    /// to [`Cache::finish`].
    pub fn begin(&mut self, key: impl Into<String>, handle: H) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.entries
            .insert(key.into(), Entry::InFlight { ticket, handle });
        ticket
    }

    /// Complete an in-flight entry. `None` evicts it so the next read
    /// retries. Ignored if the entry was invalidated or replaced meanwhile.
    pub fn finish(&mut self, key: &str, ticket: u64, value: Option<Value>) -> bool {
        let current = matches!(
            self.entries.get(key),
            Some(Entry::InFlight { ticket: t, .. }) if *t == ticket
        );
        if !current {
            return false;
        }
        match value {
            Some(value) => {
                self.entries.insert(key.to_string(), Entry::Resolved(value));
            }
            None => {
                self.entries.remove(key);
            }
        }
        true
    }

    pub fn store(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), Entry::Resolved(value));
    }

    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut cache: Cache<&str> = Cache::new();
        assert!(matches!(cache.state("*IDN?"), CacheState::NotCached));

        let ticket = cache.begin("*IDN?", "handle");
        assert!(matches!(cache.state("*IDN?"), CacheState::InFlight(&"handle")));

        assert!(cache.finish("*IDN?", ticket, Some(Value::Text("PACE".into()))));
        assert!(matches!(
            cache.state("*IDN?"),
            CacheState::Resolved(Value::Text(t)) if t == "PACE"
        ));
    }

    #[test]
    fn test_failure_evicts() {
        let mut cache: Cache<()> = Cache::new();
        let ticket = cache.begin("k", ());
        assert!(cache.finish("k", ticket, None));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let mut cache: Cache<()> = Cache::new();
        let old = cache.begin("k", ());
        cache.invalidate("k");
        cache.store("k", Value::Int(2));

        assert!(!cache.finish("k", old, Some(Value::Int(1))));
        assert!(matches!(cache.state("k"), CacheState::Resolved(Value::Int(2))));

        let newer = cache.begin("k", ());
        assert!(!cache.finish("k", old, None));
        assert!(cache.finish("k", newer, Some(Value::Int(3))));
    }
}
