//! Picks a target sign for a player from the store's catalog.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::store::{SimilarityStore, StoreError};

/// Sentinel tier meaning "any difficulty"
pub const ANY_TIER: &str = "ANY";

pub struct TargetSelector<S> {
    store: Arc<S>,
}

impl<S: SimilarityStore> TargetSelector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Pick one label uniformly at random among the signs stored at the given
    /// difficulty tier ("ANY" scans the whole catalog). `Ok(None)` means the
    /// tier has no signs; the caller surfaces that as a user-facing error.
    ///
    /// This scans the store and belongs off the dispatch path.
    pub async fn select_target(&self, difficulty: &str) -> Result<Option<String>, StoreError> {
        let tier = difficulty.trim().to_uppercase();
        let filter = if tier == ANY_TIER {
            None
        } else {
            Some(tier.as_str())
        };

        let labels = self.store.scan_labels(filter).await?;

        // A tier usually stores several reference fingerprints per label
        let unique: Vec<String> = labels
            .into_iter()
            .map(|label| label.to_uppercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(unique.choose(&mut rand::thread_rng()).cloned())
    }
}
