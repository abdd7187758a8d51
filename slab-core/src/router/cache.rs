//! Bounded LRU cache of the last routing decision per `requestId`, used for
//! diagnostics and to drive fallback-on-failure.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::RoutingDecision;

struct Inner {
    map: HashMap<String, RoutingDecision>,
    order: Vec<String>,
    capacity: usize,
}

pub struct RouteCache {
    inner: Mutex<Inner>,
}

impl RouteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: Vec::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn put(&self, request_id: String, decision: RoutingDecision) {
        let mut inner = self.inner.lock().unwrap();
        if inner.map.contains_key(&request_id) {
            inner.order.retain(|k| k != &request_id);
        } else if inner.map.len() >= inner.capacity {
            if let Some(oldest) = inner.order.first().cloned() {
                inner.order.remove(0);
                inner.map.remove(&oldest);
            }
        }
        inner.order.push(request_id.clone());
        inner.map.insert(request_id, decision);
    }

    pub fn get(&self, request_id: &str) -> Option<RoutingDecision> {
        self.inner.lock().unwrap().map.get(request_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelManifest;

    fn decision(id: &str) -> RoutingDecision {
        RoutingDecision {
            provider_id: id.to_string(),
            score: 50,
            fallback_providers: vec![],
            manifest: ModelManifest::synthesize_from_path(
                "m",
                "t",
                concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"),
            )
            .unwrap_or_else(|| panic!("expected manifest path to exist")),
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache = RouteCache::new(2);
        cache.put("a".into(), decision("p1"));
        cache.put("b".into(), decision("p2"));
        cache.put("c".into(), decision("p3"));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }
}
