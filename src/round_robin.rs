//! Round-robin cursor over a pool of interchangeable deployments.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::endpoints::{Endpoint, Pool};
use crate::error::{GatewayError, Result};

/// Process-wide rotation state for one pool.
///
/// Every call to [`RoundRobinCursor::next`] consumes exactly one rotation step,
/// so concurrent callers never observe the same step and each full cycle
/// visits every member once. `position` always holds a valid member index.
#[derive(Debug)]
pub struct RoundRobinCursor {
    name: String,
    members: Vec<Endpoint>,
    position: AtomicUsize,
}

impl RoundRobinCursor {
    pub fn new(pool: &Pool) -> Result<Self> {
        if pool.members.is_empty() {
            return Err(GatewayError::Config(format!(
                "pool {} has no members",
                pool.name
            )));
        }
        Ok(Self {
            name: pool.name.clone(),
            members: pool.members.clone(),
            position: AtomicUsize::new(0),
        })
    }

    /// Return the current target and advance, wrapping after the last member.
    pub fn next(&self) -> &Endpoint {
        let len = self.members.len();
        // fetch_update only fails when the closure returns None
        let idx = match self
            .position
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some((p + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        };
        &self.members[idx]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of members, which is also the number of attempts one dispatch may make.
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::EndpointKind;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn pool(names: &[&str]) -> Pool {
        Pool {
            name: "pool".to_string(),
            members: names
                .iter()
                .map(|n| Endpoint {
                    name: n.to_string(),
                    url: format!("https://{n}.example.com/chat/completions"),
                    kind: EndpointKind::ChatPooled,
                })
                .collect(),
        }
    }

    #[test]
    fn cycles_in_fixed_order() {
        let cursor = RoundRobinCursor::new(&pool(&["a", "b", "c"])).unwrap();
        assert_eq!(cursor.size(), 3);
        let seen: Vec<_> = (0..7).map(|_| cursor.next().name.clone()).collect();
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn single_member_pool_always_returns_it() {
        let cursor = RoundRobinCursor::new(&pool(&["only"])).unwrap();
        for _ in 0..5 {
            assert_eq!(cursor.next().name, "only");
        }
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(RoundRobinCursor::new(&pool(&[])).is_err());
    }

    #[test]
    fn concurrent_advances_are_fair() {
        let cursor = Arc::new(RoundRobinCursor::new(&pool(&["a", "b", "c"])).unwrap());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let cursor = cursor.clone();
                std::thread::spawn(move || {
                    (0..300)
                        .map(|_| cursor.next().name.clone())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for t in threads {
            for name in t.join().expect("worker thread") {
                *counts.entry(name).or_insert(0) += 1;
            }
        }

        // 2400 steps over 3 members: no step lost or duplicated
        assert_eq!(counts.get("a"), Some(&800));
        assert_eq!(counts.get("b"), Some(&800));
        assert_eq!(counts.get("c"), Some(&800));
        assert_eq!(cursor.next().name, "a");
    }
}
