//! Landmark engine running the palm detection and hand landmark networks on the CPU with `tract`.
//!
//! Palm detection runs on the whole (letterboxed) frame and yields a rotated region for every hand.
//! The landmark network then looks at each region, cropped, rotated upright and scaled to its
//! `224x224` input, and estimates the 21 landmarks of the hand, a presence score, and handedness.
//! Landmarks are mapped back into the frame, and their bounding box is where the hand is looked for
//! in the next frame.

use std::path::Path;

use anyhow::bail;

use crate::engine::nn::{self, Network};
use crate::engine::palm::{PalmDetection, PalmDetector};
use crate::engine::roi::{hand_rotation, RotatedRect};
use crate::engine::tracking::{Hand, HandTracker, Stages};
use crate::engine::{EngineOptions, LandmarkEngine};
use crate::image::Frame;
use crate::landmark::{
    DetectionResult, Handedness, Landmark, LandmarkIdx, LandmarkSet, NUM_LANDMARKS,
};
use crate::resolution::Resolution;
use crate::timer::Timer;

/// Relative amount (of the landmark bounding box height) by which the next region is moved towards
/// the fingers.
const NEXT_SHIFT: f32 = 0.1;
/// Doubles the size of the landmark bounding box.
const NEXT_GROW: f32 = 0.5;

/// An open inference session for the palm detection and hand landmark networks.
pub struct OnnxLandmarkEngine {
    stages: OnnxStages,
    tracker: HandTracker,
}

struct OnnxStages {
    palm: PalmDetector,
    landmarks: Network,
    t_landmark: Timer,
}

impl OnnxLandmarkEngine {
    /// Loads both networks and opens a session.
    ///
    /// The networks must take one `[1, 3, H, W]` RGB input with values in 0.0..=1.0.
    pub fn open<P: AsRef<Path>, L: AsRef<Path>>(
        palm_path: P,
        landmark_path: L,
        options: EngineOptions,
    ) -> anyhow::Result<Self> {
        let palm = PalmDetector::open(palm_path.as_ref())?;
        let landmarks = Network::load(landmark_path.as_ref())?;

        log::debug!(
            "opened landmark engine session: {} + {} ({:?}, up to {} hands)",
            palm_path.as_ref().display(),
            landmark_path.as_ref().display(),
            options.complexity(),
            options.hand_limit(),
        );

        Ok(Self {
            stages: OnnxStages {
                palm,
                landmarks,
                t_landmark: Timer::new("landmark"),
            },
            tracker: HandTracker::new(options),
        })
    }

    /// Opens the networks for the configured [`ModelComplexity`] from `dir`.
    ///
    /// [`ModelComplexity`]: crate::engine::ModelComplexity
    pub fn open_dir<P: AsRef<Path>>(dir: P, options: EngineOptions) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let complexity = options.complexity();
        Self::open(
            dir.join(complexity.palm_file_name()),
            dir.join(complexity.landmark_file_name()),
            options,
        )
    }

    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.stages.landmarks.input_resolution()
    }
}

impl LandmarkEngine for OnnxLandmarkEngine {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<DetectionResult> {
        if frame.resolution().is_empty() {
            bail!("cannot run inference on an empty {} frame", frame.resolution());
        }
        self.tracker.track(&mut self.stages, frame)
    }

    fn timers(&self) -> Vec<&Timer> {
        let mut timers: Vec<_> = self.stages.palm.timers().collect();
        timers.push(&self.stages.t_landmark);
        timers
    }
}

impl Drop for OnnxLandmarkEngine {
    fn drop(&mut self) {
        log::debug!("closing landmark engine session");
    }
}

impl Stages for OnnxStages {
    fn detect_palms(
        &mut self,
        frame: &Frame,
        threshold: f32,
    ) -> anyhow::Result<Vec<PalmDetection>> {
        self.palm.detect(frame, threshold)
    }

    fn estimate(
        &mut self,
        frame: &Frame,
        roi: &RotatedRect,
        threshold: f32,
    ) -> anyhow::Result<Option<Hand>> {
        let view = roi.map(|rect| rect.square());
        let outputs = self.t_landmark.time(|| self.landmarks.run(frame, &view))?;
        if outputs.len() < 3 {
            bail!("landmark network returned {} outputs, expected 3", outputs.len());
        }

        let raw = RawOutputs {
            screen_landmarks: outputs[0].as_slice::<f32>()?,
            presence: nn::scalar(&outputs[1])?,
            handedness: nn::scalar(&outputs[2])?,
        };
        let input_res = self.landmarks.input_resolution();
        match raw.decode(input_res, threshold)? {
            Some(hand) => Ok(Some(hand.place(&view, input_res, frame.resolution())?)),
            None => Ok(None),
        }
    }
}

struct RawOutputs<'a> {
    /// `x, y, z` triples in input pixel coordinates.
    screen_landmarks: &'a [f32],
    presence: f32,
    handedness: f32,
}

impl RawOutputs<'_> {
    /// Returns the landmarks, or `None` if the presence score is below `threshold`.
    fn decode(&self, input_res: Resolution, threshold: f32) -> anyhow::Result<Option<RawHand>> {
        if self.screen_landmarks.len() != NUM_LANDMARKS * 3 {
            bail!(
                "landmark network returned {} coordinates, expected {}",
                self.screen_landmarks.len(),
                NUM_LANDMARKS * 3,
            );
        }
        if input_res.is_empty() {
            bail!("landmark network has an empty {} input", input_res);
        }
        if self.presence < threshold {
            return Ok(None);
        }

        let mut points = [[0.0; 3]; NUM_LANDMARKS];
        for (point, c) in points.iter_mut().zip(self.screen_landmarks.chunks_exact(3)) {
            *point = [c[0], c[1], c[2]];
        }
        let handedness = if self.handedness > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        };
        Ok(Some(RawHand { points, handedness }))
    }
}

/// Landmarks as the network sees them, in input pixel coordinates.
struct RawHand {
    points: [[f32; 3]; NUM_LANDMARKS],
    handedness: Handedness,
}

impl RawHand {
    /// Maps the landmarks from the network input (showing `view`) back into a `frame` of the given
    /// resolution, and computes the region to search in the next frame.
    fn place(
        &self,
        view: &RotatedRect,
        input_res: Resolution,
        frame: Resolution,
    ) -> anyhow::Result<Hand> {
        let sx = view.rect().width() / input_res.width() as f32;
        let sy = view.rect().height() / input_res.height() as f32;
        let pixels = self.points.map(|[x, y, z]| {
            let [fx, fy] = view.transform_out([x * sx, y * sy]);
            [fx, fy, z * sx]
        });

        let xy = |idx: LandmarkIdx| {
            let [x, y, _] = pixels[idx as usize];
            [x, y]
        };
        let angle = hand_rotation(xy(LandmarkIdx::Wrist), xy(LandmarkIdx::MiddleFingerMcp));
        let Some(bounds) = RotatedRect::bounding(angle, pixels.iter().map(|&[x, y, _]| [x, y]))
        else {
            bail!("landmark network returned no landmarks");
        };
        let next_roi = bounds
            .shift([0.0, -NEXT_SHIFT * bounds.rect().height()])
            .map(|rect| rect.square().grow_rel(NEXT_GROW));

        let (fw, fh) = (frame.width() as f32, frame.height() as f32);
        let landmarks = pixels.map(|[x, y, z]| Landmark::new(x / fw, y / fh, z / fw));
        Ok(Hand {
            landmarks: LandmarkSet::new(landmarks).with_handedness(self.handedness),
            next_roi,
        })
    }
}
