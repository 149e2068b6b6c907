//! Combines per-hand fingerprints into the fixed-width vector used for
//! similarity matching.

use serde::Deserialize;
use thiserror::Error;

use crate::hand::Handedness;

use super::normalize::{HandFingerprint, HAND_DIMS};

/// Dimensions of a two-hand fingerprint: right-hand 60D followed by left-hand 60D
pub const PAIR_DIMS: usize = 2 * HAND_DIMS;

/// Whether matching runs against 60D single-hand or 120D two-hand references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Single,
    #[default]
    Dual,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssembleError {
    /// The player moved out of frame; routine, never fatal
    #[error("no hands detected in frame")]
    NoHandsDetected,
}

/// Query vector ready for the similarity store (60 or 120 dimensions)
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledFingerprint(Vec<f32>);

impl AssembledFingerprint {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }
}

/// Assemble zero or more per-hand fingerprints into a query vector.
///
/// In dual mode each fingerprint fills the slot matching its reported
/// handedness (the coordinates were mirrored, not the slot assignment);
/// an absent hand leaves its slot zero-filled, and a repeated handedness
/// keeps the last detection. Single mode returns the first hand as-is.
pub fn assemble(
    hands: &[HandFingerprint],
    mode: MatchMode,
) -> Result<AssembledFingerprint, AssembleError> {
    let Some(first) = hands.first() else {
        return Err(AssembleError::NoHandsDetected);
    };

    match mode {
        MatchMode::Single => Ok(AssembledFingerprint(first.values.to_vec())),
        MatchMode::Dual => {
            let mut right = [0.0f32; HAND_DIMS];
            let mut left = [0.0f32; HAND_DIMS];
            for hand in hands {
                match hand.handedness {
                    Handedness::Right => right = hand.values,
                    Handedness::Left => left = hand.values,
                }
            }

            let mut vector = Vec::with_capacity(PAIR_DIMS);
            vector.extend_from_slice(&right);
            vector.extend_from_slice(&left);
            Ok(AssembledFingerprint(vector))
        }
    }
}
