pub mod assemble;
pub mod normalize;

pub use assemble::{assemble, AssembleError, AssembledFingerprint, MatchMode, PAIR_DIMS};
pub use normalize::{normalize, HandFingerprint, NormalizeError, HAND_DIMS};
