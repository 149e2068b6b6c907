//! Reduces one detected hand to a translation-, scale-, and
//! handedness-invariant fingerprint vector.

use thiserror::Error;

use crate::hand::{HandLandmark, HandPose, Handedness, Landmark};

/// Dimensions of a single-hand fingerprint: 20 landmarks x 3 axes
/// (the wrist is dropped after serving as the origin)
pub const HAND_DIMS: usize = (HandLandmark::COUNT - 1) * 3;

/// Scale references below this are treated as a collapsed pose
const SCALE_EPSILON: f32 = 1e-6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// The wrist-to-middle-MCP distance vanished; no usable geometry
    #[error("degenerate hand geometry: scale reference below epsilon")]
    DegenerateGeometry,
}

/// Normalized fingerprint of one hand.
///
/// `handedness` is the label the detector reported, before mirroring; the
/// assembler uses it for slot placement.
#[derive(Debug, Clone, PartialEq)]
pub struct HandFingerprint {
    pub handedness: Handedness,
    pub values: [f32; HAND_DIMS],
}

/// Normalize a detected hand pose into a 60D fingerprint.
///
/// Steps, in order: center on the wrist, scale by the wrist-to-middle-MCP
/// distance, drop the wrist entry, and mirror the x axis for left hands so
/// both hands land on the same fingerprint manifold. No rotation correction
/// is applied; orientation differences are left to the match threshold.
pub fn normalize(pose: &HandPose) -> Result<HandFingerprint, NormalizeError> {
    let wrist = pose.landmarks[HandLandmark::Wrist as usize];

    let mut centered = [Landmark::default(); HandLandmark::COUNT];
    for (point, lm) in centered.iter_mut().zip(pose.landmarks.iter()) {
        *point = Landmark::new(lm.x - wrist.x, lm.y - wrist.y, lm.z - wrist.z);
    }

    let scale = centered[HandLandmark::MiddleFingerMcp as usize].norm();
    if scale < SCALE_EPSILON {
        return Err(NormalizeError::DegenerateGeometry);
    }

    let mirror = match pose.handedness {
        Handedness::Left => -1.0,
        Handedness::Right => 1.0,
    };

    let mut values = [0.0f32; HAND_DIMS];
    for i in 1..HandLandmark::COUNT {
        let base = (i - 1) * 3;
        values[base] = centered[i].x / scale * mirror;
        values[base + 1] = centered[i].y / scale;
        values[base + 2] = centered[i].z / scale;
    }

    Ok(HandFingerprint {
        handedness: pose.handedness,
        values,
    })
}
