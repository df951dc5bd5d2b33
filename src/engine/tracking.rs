//! Multi-hand tracking across consecutive frames.
//!
//! Every hand found in a frame leaves behind a region of interest (RoI) for the next frame. Hands
//! with a RoI skip palm detection and go straight to the landmark network; palm detection only
//! runs while fewer than the maximum number of hands are tracked, and new palms that overlap an
//! already tracked hand are ignored.

use crate::image::Frame;
use crate::landmark::{DetectionResult, LandmarkSet};

use super::palm::PalmDetection;
use super::roi::RotatedRect;
use super::EngineOptions;

/// A hand found by the landmark network.
#[derive(Debug, Clone)]
pub struct Hand {
    pub landmarks: LandmarkSet,
    /// Where to look for this hand in the next frame.
    pub next_roi: RotatedRect,
}

/// The two networks the tracker chains.
pub trait Stages {
    /// Detects palms scoring at least `threshold`, most confident first.
    fn detect_palms(
        &mut self,
        frame: &Frame,
        threshold: f32,
    ) -> anyhow::Result<Vec<PalmDetection>>;

    /// Runs the landmark network on `roi`. Returns `None` if the hand presence score is below
    /// `threshold`.
    fn estimate(
        &mut self,
        frame: &Frame,
        roi: &RotatedRect,
        threshold: f32,
    ) -> anyhow::Result<Option<Hand>>;
}

pub struct HandTracker {
    options: EngineOptions,
    tracked: Vec<RotatedRect>,
}

impl HandTracker {
    /// Intersection over union at which two regions are considered to contain the same hand.
    pub const IOU_THRESH: f32 = 0.3;

    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            tracked: Vec::new(),
        }
    }

    /// Returns the regions that will be searched for hands in the next frame.
    pub fn tracked(&self) -> &[RotatedRect] {
        &self.tracked
    }

    /// Finds up to [`EngineOptions::hand_limit`] hands in `frame`.
    ///
    /// Tracked hands come first, in the order they were first found. If a stage fails, tracking
    /// starts over on the next frame.
    pub fn track<S: Stages>(
        &mut self,
        stages: &mut S,
        frame: &Frame,
    ) -> anyhow::Result<DetectionResult> {
        let limit = self.options.hand_limit();
        let mut hands = Vec::new();
        let mut rois: Vec<RotatedRect> = Vec::new();

        for roi in std::mem::take(&mut self.tracked) {
            if hands.len() >= limit {
                break;
            }
            let Some(hand) = stages.estimate(frame, &roi, self.options.threshold(true))? else {
                log::trace!("lost track of hand at {:?}", roi.rect().center());
                continue;
            };
            // Two regions can drift onto the same hand.
            if overlaps(&rois, &hand.next_roi) {
                continue;
            }
            rois.push(hand.next_roi);
            hands.push(hand.landmarks);
        }

        if hands.len() < limit {
            let threshold = self.options.threshold(false);
            for palm in stages.detect_palms(frame, threshold)? {
                if hands.len() >= limit {
                    break;
                }
                let roi = palm.hand_roi();
                if overlaps(&rois, &roi) {
                    continue;
                }
                if let Some(hand) = stages.estimate(frame, &roi, threshold)? {
                    log::trace!("found new hand (palm confidence {:.2})", palm.confidence());
                    rois.push(hand.next_roi);
                    hands.push(hand.landmarks);
                }
            }
        }

        self.tracked = rois;
        Ok(DetectionResult::new(hands))
    }
}

fn overlaps(rois: &[RotatedRect], roi: &RotatedRect) -> bool {
    let bounds = roi.bounding_rect();
    rois.iter()
        .any(|other| other.bounding_rect().iou(&bounds) >= HandTracker::IOU_THRESH)
}
