//! Hand landmark data.
//!
//! A [`LandmarkSet`] is the 21-point skeleton of one hand, a [`DetectionResult`] is every hand
//! found in one frame.

use std::fmt;

use crate::error::{Error, Result};

/// Number of landmarks in a [`LandmarkSet`].
pub const NUM_LANDMARKS: usize = 21;

/// A hand keypoint in normalized image coordinates.
///
/// `x` and `y` are in range 0.0 to 1.0 relative to the frame's width and height, with Y pointing
/// *down* like in the input image. `z` is a relative depth estimate without a fixed unit (smaller
/// values are closer to the camera).
#[derive(Debug, Default, PartialEq, Clone, Copy)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f32; 3]> for Landmark {
    #[inline]
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// The full skeleton of one detected hand.
///
/// Always holds exactly [`NUM_LANDMARKS`] landmarks, indexed by [`LandmarkIdx`].
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    landmarks: [Landmark; NUM_LANDMARKS],
    handedness: Option<Handedness>,
}

impl LandmarkSet {
    pub fn new(landmarks: [Landmark; NUM_LANDMARKS]) -> Self {
        Self {
            landmarks,
            handedness: None,
        }
    }

    /// Creates a landmark set from a slice, which must contain exactly [`NUM_LANDMARKS`] entries.
    pub fn from_slice(landmarks: &[Landmark]) -> Result<Self> {
        let landmarks = <[Landmark; NUM_LANDMARKS]>::try_from(landmarks).map_err(|_| {
            Error::InvalidInput {
                expected: NUM_LANDMARKS,
                actual: landmarks.len(),
            }
        })?;
        Ok(Self::new(landmarks))
    }

    pub fn with_handedness(self, handedness: Handedness) -> Self {
        Self {
            handedness: Some(handedness),
            ..self
        }
    }

    #[inline]
    pub fn landmarks(&self) -> &[Landmark; NUM_LANDMARKS] {
        &self.landmarks
    }

    #[inline]
    pub fn get(&self, idx: LandmarkIdx) -> Landmark {
        self.landmarks[idx as usize]
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = Landmark> + '_ {
        self.landmarks.iter().copied()
    }

    /// Returns the estimated handedness, if the engine reports one.
    #[inline]
    pub fn handedness(&self) -> Option<Handedness> {
        self.handedness
    }
}

impl TryFrom<Vec<Landmark>> for LandmarkSet {
    type Error = Error;

    fn try_from(landmarks: Vec<Landmark>) -> Result<Self> {
        Self::from_slice(&landmarks)
    }
}

/// Formats the landmarks as an `index x y z` table.
impl fmt::Display for LandmarkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>5} {:>6} {:>6} {:>6}", "index", "x", "y", "z")?;
        for (i, lm) in self.landmarks.iter().enumerate() {
            writeln!(f, "{:>5} {:>6.2} {:>6.2} {:>6.2}", i, lm.x, lm.y, lm.z)?;
        }
        Ok(())
    }
}

/// All hands detected in a single frame, in the order the engine reported them.
///
/// An empty result is valid and means that no hand is visible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    hands: Vec<LandmarkSet>,
}

impl DetectionResult {
    /// Returns a result without any hands.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(hands: Vec<LandmarkSet>) -> Self {
        Self { hands }
    }

    #[inline]
    pub fn hands(&self) -> &[LandmarkSet] {
        &self.hands
    }

    /// Returns the first detected hand, the one the point view displays.
    #[inline]
    pub fn first(&self) -> Option<&LandmarkSet> {
        self.hands.first()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }
}

impl FromIterator<LandmarkSet> for DetectionResult {
    fn from_iter<T: IntoIterator<Item = LandmarkSet>>(iter: T) -> Self {
        Self {
            hands: iter.into_iter().collect(),
        }
    }
}

/// Names for the hand landmarks.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Pairs of landmarks connected by a bone.
pub const CONNECTIVITY: &[(LandmarkIdx, LandmarkIdx)] = {
    use LandmarkIdx::*;
    &[
        // Palm:
        (Wrist, ThumbCmc),
        (ThumbCmc, IndexFingerMcp),
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, PinkyMcp),
        (PinkyMcp, Wrist),
        // Thumb:
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        // Index:
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        // Middle:
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        // Ring:
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        // Pinky:
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};
