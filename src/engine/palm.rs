//! Palm detection.
//!
//! The palm detection network is a Single-Shot MultiBox Detector: for every anchor it predicts a
//! score, a box and 7 keypoints relative to the anchor. Overlapping detections of the same palm
//! are merged by non-maximum averaging.

use std::path::Path;

use anyhow::bail;

use crate::image::Frame;
use crate::resolution::Resolution;
use crate::timer::Timer;

use super::nn::{self, Network};
use super::roi::{hand_rotation, Rect, RotatedRect};

/// A keypoint of a [`PalmDetection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

pub const NUM_KEYPOINTS: usize = 7;

/// Values per anchor in the box output: center offset, size, and 7 keypoint offsets.
const BOX_PARAMS: usize = 4 + 2 * NUM_KEYPOINTS;

/// Relative amount (of the palm box height) by which the hand region is moved towards the fingers.
const HAND_SHIFT: f32 = 0.5;
/// Grows the squared palm box to 2.6 times its size, enough to contain the fingers.
const HAND_GROW: f32 = 0.8;

/// A detected palm, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PalmDetection {
    confidence: f32,
    rect: Rect,
    keypoints: [[f32; 2]; NUM_KEYPOINTS],
}

impl PalmDetection {
    pub fn new(confidence: f32, rect: Rect, keypoints: [[f32; 2]; NUM_KEYPOINTS]) -> Self {
        Self {
            confidence,
            rect,
            keypoints,
        }
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    #[inline]
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    #[inline]
    pub fn keypoint(&self, keypoint: Keypoint) -> [f32; 2] {
        self.keypoints[keypoint as usize]
    }

    /// Returns the clockwise rotation of the palm compared to an upright position.
    pub fn angle(&self) -> f32 {
        hand_rotation(
            self.keypoint(Keypoint::Wrist),
            self.keypoint(Keypoint::MiddleFingerMcp),
        )
    }

    /// Returns the region the landmark network should look at to find the whole hand.
    pub fn hand_roi(&self) -> RotatedRect {
        RotatedRect::new(self.rect, self.angle())
            .shift([0.0, -HAND_SHIFT * self.rect.height()])
            .map(|rect| rect.square().grow_rel(HAND_GROW))
    }

    fn map(self, f: impl Fn([f32; 2]) -> [f32; 2], scale: f32) -> Self {
        let [x, y] = f(self.rect.center());
        Self {
            rect: Rect::from_center(x, y, self.rect.width() * scale, self.rect.height() * scale),
            keypoints: self.keypoints.map(f),
            ..self
        }
    }
}

/// Computes the anchor centers (in 0.0..=1.0) of the palm detection network.
///
/// The network has 2 output layers, at strides 8 and 16 of the input, with 2 and 6 anchors per
/// cell.
fn anchors(input_res: Resolution) -> Vec<[f32; 2]> {
    let mut anchors = Vec::new();
    for (stride, per_cell) in [(8, 2), (16, 6)] {
        let (w, h) = (input_res.width() / stride, input_res.height() / stride);
        for y in 0..h {
            for x in 0..w {
                let center = [(x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32];
                anchors.extend(std::iter::repeat(center).take(per_cell));
            }
        }
    }
    anchors
}

/// Extracts all detections scoring at least `threshold` from the raw network outputs.
///
/// Coordinates are in network input pixels.
fn decode(
    anchors: &[[f32; 2]],
    input_res: Resolution,
    boxes: &[f32],
    scores: &[f32],
    threshold: f32,
) -> anyhow::Result<Vec<PalmDetection>> {
    if boxes.len() != anchors.len() * BOX_PARAMS || scores.len() != anchors.len() {
        bail!(
            "palm detection network returned {} box values and {} scores for {} anchors",
            boxes.len(),
            scores.len(),
            anchors.len(),
        );
    }

    let (w, h) = (input_res.width() as f32, input_res.height() as f32);
    let detections = anchors
        .iter()
        .zip(boxes.chunks_exact(BOX_PARAMS))
        .zip(scores)
        .filter_map(|((anchor, params), &score)| {
            let confidence = nn::sigmoid(score);
            if confidence < threshold {
                return None;
            }

            let [ax, ay] = [anchor[0] * w, anchor[1] * h];
            let rect = Rect::from_center(params[0] + ax, params[1] + ay, params[2], params[3]);
            let mut keypoints = [[0.0; 2]; NUM_KEYPOINTS];
            for (kp, xy) in keypoints.iter_mut().zip(params[4..].chunks_exact(2)) {
                *kp = [xy[0] + ax, xy[1] + ay];
            }
            Some(PalmDetection::new(confidence, rect, keypoints))
        })
        .collect();
    Ok(detections)
}

/// Merges overlapping detections into their confidence-weighted average.
///
/// Returns the merged detections, most confident first.
pub fn non_max_averaging(
    mut detections: Vec<PalmDetection>,
    iou_thresh: f32,
) -> Vec<PalmDetection> {
    // Ascending, so that the most confident detection can be popped off the end.
    detections.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let mut out = Vec::new();
    while let Some(seed) = detections.pop() {
        let (group, rest): (Vec<_>, Vec<_>) = detections
            .into_iter()
            .partition(|det| seed.rect.iou(&det.rect) >= iou_thresh);
        detections = rest;

        let mut divisor = seed.confidence;
        let [mut x, mut y] = seed.rect.center().map(|c| c * seed.confidence);
        let mut w = seed.rect.width() * seed.confidence;
        let mut h = seed.rect.height() * seed.confidence;
        let mut keypoints = seed
            .keypoints
            .map(|[kx, ky]| [kx * seed.confidence, ky * seed.confidence]);
        for det in &group {
            let factor = det.confidence;
            divisor += factor;
            let [cx, cy] = det.rect.center();
            x += cx * factor;
            y += cy * factor;
            w += det.rect.width() * factor;
            h += det.rect.height() * factor;
            for (acc, [kx, ky]) in keypoints.iter_mut().zip(det.keypoints) {
                acc[0] += kx * factor;
                acc[1] += ky * factor;
            }
        }

        out.push(PalmDetection {
            confidence: seed.confidence,
            rect: Rect::from_center(x / divisor, y / divisor, w / divisor, h / divisor),
            keypoints: keypoints.map(|[kx, ky]| [kx / divisor, ky / divisor]),
        });
    }
    out
}

/// Runs the palm detection network on whole frames.
pub struct PalmDetector {
    network: Network,
    anchors: Vec<[f32; 2]>,
    t_infer: Timer,
    t_extract: Timer,
}

impl PalmDetector {
    /// Intersection over union at which two detections are considered the same palm.
    pub const IOU_THRESH: f32 = 0.3;

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let network = Network::load(path)?;
        let anchors = anchors(network.input_resolution());
        Ok(Self {
            network,
            anchors,
            t_infer: Timer::new("palm"),
            t_extract: Timer::new("palm-extract"),
        })
    }

    /// Detects the palms in `frame` scoring at least `threshold`, most confident first.
    pub fn detect(&self, frame: &Frame, threshold: f32) -> anyhow::Result<Vec<PalmDetection>> {
        let input_res = self.network.input_resolution();

        // Letterbox the frame to the (square) network input.
        let (fw, fh) = (frame.width() as f32, frame.height() as f32);
        let view = Rect::from_center(fw * 0.5, fh * 0.5, fw, fh).square();

        let outputs = self
            .t_infer
            .time(|| self.network.run(frame, &RotatedRect::from(view)))?;
        if outputs.len() < 2 {
            bail!("palm detection network returned {} outputs, expected 2", outputs.len());
        }

        self.t_extract.time(|| -> anyhow::Result<Vec<PalmDetection>> {
            let detections = decode(
                &self.anchors,
                input_res,
                outputs[0].as_slice::<f32>()?,
                outputs[1].as_slice::<f32>()?,
                threshold,
            )?;

            let scale = view.width() / input_res.width() as f32;
            let (left, top) = (view.x(), view.y());
            let to_frame = |[x, y]: [f32; 2]| [x * scale + left, y * scale + top];
            Ok(non_max_averaging(detections, Self::IOU_THRESH)
                .into_iter()
                .map(|det| det.map(to_frame, scale))
                .collect())
        })
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract].into_iter()
    }
}
