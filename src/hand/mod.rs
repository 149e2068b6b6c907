pub mod detector;
pub mod landmark;

pub use detector::{HandDetector, OnnxHandDetector};
pub use landmark::{HandLandmark, HandPose, Handedness, Landmark};
