//! Hand landmark inference.
//!
//! The [`LandmarkEngine`] trait is the seam between the capture loop and whatever produces
//! landmarks. The capture loop only ever calls it from one thread, one frame at a time, so
//! implementations do not need to be reentrant.

mod nn;
pub mod onnx;
pub mod palm;
pub mod roi;
pub mod tracking;

use crate::image::Frame;
use crate::landmark::DetectionResult;
use crate::timer::Timer;

/// A stateful inference session turning RGB frames into hand landmarks.
///
/// Sessions are opened by the implementation's constructor and closed when the value is dropped.
pub trait LandmarkEngine {
    /// Detects the hands in `frame`.
    ///
    /// Finding no hands is not an error; an empty [`DetectionResult`] is returned instead.
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<DetectionResult>;

    /// Returns profiling timers for the stages of [`LandmarkEngine::infer`].
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl<E: LandmarkEngine + ?Sized> LandmarkEngine for Box<E> {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<DetectionResult> {
        (**self).infer(frame)
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}

/// Trade-off between landmark accuracy and inference latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelComplexity {
    /// The lightweight network. Faster, but less accurate.
    #[default]
    Lite,
    /// Takes roughly 25-30% longer to infer than [`ModelComplexity::Lite`] (on CPU).
    Full,
}

impl ModelComplexity {
    /// File name of the ONNX landmark network implementing this complexity level.
    pub fn landmark_file_name(self) -> &'static str {
        match self {
            ModelComplexity::Lite => "hand_landmark_lite.onnx",
            ModelComplexity::Full => "hand_landmark_full.onnx",
        }
    }

    /// File name of the ONNX palm detection network implementing this complexity level.
    pub fn palm_file_name(self) -> &'static str {
        match self {
            ModelComplexity::Lite => "palm_detection_lite.onnx",
            ModelComplexity::Full => "palm_detection_full.onnx",
        }
    }
}

/// Fixed engine parameters, passed once at construction.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    complexity: ModelComplexity,
    max_hands: usize,
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            complexity: ModelComplexity::Lite,
            max_hands: 2,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

impl EngineOptions {
    #[inline]
    pub fn model_complexity(self, complexity: ModelComplexity) -> Self {
        Self { complexity, ..self }
    }

    /// Sets the maximum number of hands reported per frame.
    #[inline]
    pub fn max_hands(self, max_hands: usize) -> Self {
        Self { max_hands, ..self }
    }

    /// Sets the palm detection score and hand presence score required to report a hand that was
    /// not tracked in the previous frame.
    #[inline]
    pub fn min_detection_confidence(self, confidence: f32) -> Self {
        Self {
            min_detection_confidence: confidence,
            ..self
        }
    }

    /// Sets the hand presence score required to keep reporting a hand that was visible in the
    /// previous frame.
    #[inline]
    pub fn min_tracking_confidence(self, confidence: f32) -> Self {
        Self {
            min_tracking_confidence: confidence,
            ..self
        }
    }

    #[inline]
    pub fn complexity(&self) -> ModelComplexity {
        self.complexity
    }

    #[inline]
    pub fn hand_limit(&self) -> usize {
        self.max_hands
    }

    /// Returns the presence threshold to apply, depending on whether a hand is currently tracked.
    #[inline]
    pub fn threshold(&self, tracking: bool) -> f32 {
        if tracking {
            self.min_tracking_confidence
        } else {
            self.min_detection_confidence
        }
    }
}
