//! Identifier generation for clusters and trades.
//!
//! Components take an `IdGenerator` at construction so tests can pin ids.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait IdGenerator: Send + Sync {
    fn next_id(&self, prefix: &str) -> String;
}

/// `prefix-1`, `prefix-2`, ... shared across prefixes.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", prefix, n)
    }
}

/// 64 random bits, hex encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self, prefix: &str) -> String {
        let bits: u64 = rand::thread_rng().gen();
        format!("{}-{}", prefix, hex::encode(bits.to_be_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids_are_deterministic() {
        let ids = SequentialIds::new();
        assert_eq!(ids.next_id("trade"), "trade-1");
        assert_eq!(ids.next_id("cluster"), "cluster-2");
    }

    #[test]
    fn test_random_ids_have_prefix() {
        let id = RandomIds.next_id("trade");
        assert!(id.starts_with("trade-"));
        assert_eq!(id.len(), "trade-".len() + 16);
    }
}
