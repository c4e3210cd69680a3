//! Cached freshness token.
//!
//! A transaction is only accepted while its blockhash is recent, and the
//! node rejects a second copy of a signature it has already seen. The cache
//! keeps the last blockhash together with every signature sent under it so
//! a resubmission can tell whether it needs a newer blockhash to produce a
//! distinct signature.

use std::collections::HashSet;
use std::time::Duration;

use ledger_codec::Blockhash;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub(crate) struct BlockhashCache {
    current: Option<CachedBlockhash>,
}

#[derive(Debug)]
struct CachedBlockhash {
    blockhash: Blockhash,
    observed_at: Instant,
    sent_signatures: HashSet<String>,
}

impl BlockhashCache {
    /// The cached blockhash if it was observed less than `max_age` ago.
    pub(crate) fn fresh(&self, max_age: Duration) -> Option<Blockhash> {
        self.current
            .as_ref()
            .filter(|cached| cached.observed_at.elapsed() < max_age)
            .map(|cached| cached.blockhash)
    }

    /// Record a signature sent under the cached blockhash. Returns `false`
    /// if it was already recorded.
    pub(crate) fn record_signature(&mut self, signature: String) -> bool {
        match self.current.as_mut() {
            Some(cached) => cached.sent_signatures.insert(signature),
            None => false,
        }
    }

    /// Store a blockhash fetched from the node. Returns `true` if it differs
    /// from the cached one, which resets the signature log.
    pub(crate) fn observe(&mut self, blockhash: Blockhash) -> bool {
        match self.current.as_mut() {
            Some(cached) if cached.blockhash == blockhash => false,
            _ => {
                self.current = Some(CachedBlockhash {
                    blockhash,
                    observed_at: Instant::now(),
                    sent_signatures: HashSet::new(),
                });
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_AGE: Duration = Duration::from_secs(30);

    #[test]
    fn empty_cache_has_nothing_fresh() {
        let cache = BlockhashCache::default();
        assert!(cache.fresh(MAX_AGE).is_none());
    }

    #[test]
    fn first_observation_counts_as_change() {
        let mut cache = BlockhashCache::default();
        assert!(cache.observe(Blockhash::new([1u8; 32])));
        assert!(!cache.observe(Blockhash::new([1u8; 32])));
        assert!(cache.observe(Blockhash::new([2u8; 32])));
    }

    #[test]
    fn duplicate_signatures_are_detected_until_blockhash_changes() {
        let mut cache = BlockhashCache::default();
        assert!(!cache.record_signature("sig".into()));

        cache.observe(Blockhash::new([1u8; 32]));
        assert!(cache.record_signature("sig".into()));
        assert!(!cache.record_signature("sig".into()));

        cache.observe(Blockhash::new([2u8; 32]));
        assert!(cache.record_signature("sig".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn blockhash_expires_after_max_age() {
        let mut cache = BlockhashCache::default();
        let hash = Blockhash::new([1u8; 32]);
        cache.observe(hash);
        assert_eq!(cache.fresh(MAX_AGE), Some(hash));

        tokio::time::advance(MAX_AGE).await;
        assert!(cache.fresh(MAX_AGE).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn same_blockhash_does_not_renew_age() {
        let mut cache = BlockhashCache::default();
        let hash = Blockhash::new([1u8; 32]);
        cache.observe(hash);
        tokio::time::advance(MAX_AGE).await;
        assert!(!cache.observe(hash));
        assert!(cache.fresh(MAX_AGE).is_none());
    }
}
