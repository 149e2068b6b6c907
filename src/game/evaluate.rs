//! Judges one assembled fingerprint against the player's target sign.

use std::fmt::Display;
use std::sync::Arc;

use crate::fingerprint::AssembledFingerprint;
use crate::store::SimilarityStore;

/// Result sent back to the client for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct MatchVerdict {
    pub correct: bool,
    /// Human-readable; always carries the percent score to one decimal
    pub feedback: String,
    /// Percent score in [0, 100]
    pub score: f32,
}

impl MatchVerdict {
    /// Negative verdict for any failure along the matching path
    pub fn failure(reason: impl Display) -> Self {
        Self {
            correct: false,
            feedback: format!("{reason}. Similarity: 0.0%"),
            score: 0.0,
        }
    }
}

pub struct MatchEvaluator<S> {
    store: Arc<S>,
    threshold: f32,
}

impl<S: SimilarityStore> MatchEvaluator<S> {
    pub fn new(store: Arc<S>, threshold: f32) -> Self {
        Self { store, threshold }
    }

    /// Look up the nearest stored reference for the target label and apply
    /// the acceptance threshold (strictly greater than).
    ///
    /// Labels are uppercased before comparison, matching how the store is
    /// populated. Search is filtered by label only, never by difficulty tier.
    /// Store failures yield a negative verdict whose feedback names the
    /// failure class; they never end the session.
    pub async fn evaluate(&self, fingerprint: &AssembledFingerprint, target: &str) -> MatchVerdict {
        let label = target.to_uppercase();

        let hits = match self.store.search(fingerprint.as_slice(), &label, 1).await {
            Ok(hits) => hits,
            // StoreError's display text already separates unreachable from
            // rejected, which is the distinction the client needs
            Err(e) => return MatchVerdict::failure(e),
        };

        let Some(best) = hits.first() else {
            return MatchVerdict::failure(format!("no reference stored for sign '{label}'"));
        };

        let score = best.score * 100.0;
        if best.score > self.threshold {
            MatchVerdict {
                correct: true,
                feedback: format!("Correct sign! Similarity: {score:.1}%"),
                score,
            }
        } else {
            MatchVerdict {
                correct: false,
                feedback: format!("Similarity too low: {score:.1}%"),
                score,
            }
        }
    }
}
