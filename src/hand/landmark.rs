use std::fmt;

/// The 21 hand landmark indices reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum HandLandmark {
    Wrist = 0,
    ThumbCmc = 1,
    ThumbMcp = 2,
    ThumbIp = 3,
    ThumbTip = 4,
    IndexFingerMcp = 5,
    IndexFingerPip = 6,
    IndexFingerDip = 7,
    IndexFingerTip = 8,
    MiddleFingerMcp = 9,
    MiddleFingerPip = 10,
    MiddleFingerDip = 11,
    MiddleFingerTip = 12,
    RingFingerMcp = 13,
    RingFingerPip = 14,
    RingFingerDip = 15,
    RingFingerTip = 16,
    PinkyMcp = 17,
    PinkyPip = 18,
    PinkyDip = 19,
    PinkyTip = 20,
}

impl HandLandmark {
    pub const COUNT: usize = 21;

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Wrist),
            1 => Some(Self::ThumbCmc),
            2 => Some(Self::ThumbMcp),
            3 => Some(Self::ThumbIp),
            4 => Some(Self::ThumbTip),
            5 => Some(Self::IndexFingerMcp),
            6 => Some(Self::IndexFingerPip),
            7 => Some(Self::IndexFingerDip),
            8 => Some(Self::IndexFingerTip),
            9 => Some(Self::MiddleFingerMcp),
            10 => Some(Self::MiddleFingerPip),
            11 => Some(Self::MiddleFingerDip),
            12 => Some(Self::MiddleFingerTip),
            13 => Some(Self::RingFingerMcp),
            14 => Some(Self::RingFingerPip),
            15 => Some(Self::RingFingerDip),
            16 => Some(Self::RingFingerTip),
            17 => Some(Self::PinkyMcp),
            18 => Some(Self::PinkyPip),
            19 => Some(Self::PinkyDip),
            20 => Some(Self::PinkyTip),
            _ => None,
        }
    }
}

/// One 3D landmark in camera-normalized coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of the landmark treated as a vector from the origin
    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Which hand the detector attributed a pose to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Parse "LEFT"/"RIGHT" in any casing
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_uppercase().as_str() {
            "LEFT" => Some(Self::Left),
            "RIGHT" => Some(Self::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Handedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
        }
    }
}

/// One detected hand: 21 landmarks plus handedness and detection confidence
#[derive(Debug, Clone)]
pub struct HandPose {
    pub landmarks: [Landmark; HandLandmark::COUNT],
    pub handedness: Handedness,
    pub confidence: f32,
}

impl HandPose {
    pub fn new(
        landmarks: [Landmark; HandLandmark::COUNT],
        handedness: Handedness,
        confidence: f32,
    ) -> Self {
        Self {
            landmarks,
            handedness,
            confidence,
        }
    }

    pub fn get(&self, index: HandLandmark) -> &Landmark {
        &self.landmarks[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_index_count() {
        assert_eq!(HandLandmark::COUNT, 21);
    }

    #[test]
    fn test_landmark_index_from_index() {
        assert_eq!(HandLandmark::from_index(0), Some(HandLandmark::Wrist));
        assert_eq!(
            HandLandmark::from_index(9),
            Some(HandLandmark::MiddleFingerMcp)
        );
        assert_eq!(HandLandmark::from_index(20), Some(HandLandmark::PinkyTip));
        assert_eq!(HandLandmark::from_index(21), None);
    }

    #[test]
    fn test_landmark_norm() {
        let lm = Landmark::new(3.0, 4.0, 0.0);
        assert!((lm.norm() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_handedness_from_label() {
        assert_eq!(Handedness::from_label("left"), Some(Handedness::Left));
        assert_eq!(Handedness::from_label("RIGHT"), Some(Handedness::Right));
        assert_eq!(Handedness::from_label("both"), None);
    }

    #[test]
    fn test_hand_pose_get() {
        let mut landmarks = [Landmark::default(); HandLandmark::COUNT];
        landmarks[HandLandmark::MiddleFingerMcp as usize] = Landmark::new(0.5, 0.3, 0.1);

        let pose = HandPose::new(landmarks, Handedness::Right, 0.9);
        let mcp = pose.get(HandLandmark::MiddleFingerMcp);
        assert_eq!(mcp.x, 0.5);
        assert_eq!(mcp.y, 0.3);
        assert_eq!(mcp.z, 0.1);
    }
}
