//! Per-tenant quota accounting.

use std::collections::HashMap;
use std::sync::Mutex;

/// Atomic check-and-increment quota counters. The default (community/
/// standalone) deployment always admits but still tracks usage so it can
/// emit events.
pub struct QuotaAccountant {
    /// `None` disables capping entirely (community deployment default).
    caps: HashMap<String, u64>,
    counters: Mutex<HashMap<(String, String), u64>>,
    usage: Mutex<HashMap<String, u64>>,
}

impl QuotaAccountant {
    /// `caps` maps `resource` name to the max allowed per tenant. An
    /// unconfigured resource is never capped.
    pub fn new(caps: HashMap<String, u64>) -> Self {
        Self {
            caps,
            counters: Mutex::new(HashMap::new()),
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(HashMap::new())
    }

    /// Atomically checks and, if under cap, increments the counter for
    /// `(key, resource)` by `amount`. Returns false without modifying state
    /// when the increment would exceed the configured cap.
    pub fn check_and_increment(&self, key: &str, resource: &str, amount: u64) -> bool {
        let Some(&cap) = self.caps.get(resource) else {
            return true;
        };
        let mut counters = self.counters.lock().unwrap();
        let entry = counters
            .entry((key.to_string(), resource.to_string()))
            .or_insert(0);
        if *entry + amount > cap {
            false
        } else {
            *entry += amount;
            true
        }
    }

    /// Records tokens used for a provider; never rejects.
    pub fn record_usage(&self, provider_id: &str, tokens: u64) {
        let mut usage = self.usage.lock().unwrap();
        *usage.entry(provider_id.to_string()).or_insert(0) += tokens;
    }

    pub fn usage_for(&self, provider_id: &str) -> u64 {
        *self.usage.lock().unwrap().get(provider_id).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_always_admits() {
        let q = QuotaAccountant::unbounded();
        for _ in 0..100 {
            assert!(q.check_and_increment("tenant", "requests", 1));
        }
    }

    #[test]
    fn cap_rejects_without_mutating_state() {
        let mut caps = HashMap::new();
        caps.insert("requests".to_string(), 10);
        let q = QuotaAccountant::new(caps);
        for _ in 0..10 {
            assert!(q.check_and_increment("tenant", "requests", 1));
        }
        assert!(!q.check_and_increment("tenant", "requests", 1));
        // still rejected on a later call, counter did not overshoot
        assert!(!q.check_and_increment("tenant", "requests", 1));
    }

    #[test]
    fn concurrent_cap_admits_exactly_the_cap() {
        use std::sync::Arc;
        let mut caps = HashMap::new();
        caps.insert("requests".to_string(), 10);
        let q = Arc::new(QuotaAccountant::new(caps));
        let mut handles = Vec::new();
        for _ in 0..11 {
            let q = q.clone();
            handles.push(std::thread::spawn(move || {
                q.check_and_increment("tenant", "requests", 1)
            }));
        }
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(admitted, 10);
    }
}
