//! Upstream target selection.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin selector.
/// Stores an internal counter to rotate through a route's targets.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pick<'a, T>(&self, targets: &'a [T]) -> Option<&'a T> {
        if targets.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % targets.len();
        targets.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_through_targets() {
        let lb = RoundRobin::new();
        let targets = ["a", "b"];

        assert_eq!(lb.pick(&targets), Some(&"a"));
        assert_eq!(lb.pick(&targets), Some(&"b"));
        assert_eq!(lb.pick(&targets), Some(&"a"));
    }

    #[test]
    fn empty_targets_yield_nothing() {
        let lb = RoundRobin::new();
        assert_eq!(lb.pick::<&str>(&[]), None);
    }
}
