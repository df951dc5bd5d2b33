//! Live hand landmark tracking.
//!
//! Frames are captured and run through palm detection and hand landmark networks on a background
//! thread ([`capture::CaptureLoop`]). The most recent result is handed to the UI thread through
//! [`state::SharedLandmarkState`], where [`render::Renderer`] draws the 21 landmarks of the first
//! hand on top of the camera image. Only the UI thread ever touches the GPU.
//!
//! # Coordinates
//!
//! Landmark `x` and `y` coordinates are normalized to the input frame: `(0, 0)` is the top left
//! corner, `(1, 1)` the bottom right one. `z` is a relative depth estimate scaled like `x`, with
//! smaller values being closer to the camera.
//!
//! # Environment Variables
//!
//! * `HANDPOSE_WEBCAM_NAME`: Forces the device to use for [`Webcam`]s. If unset, the first device
//!   that supports a compatible image format will be used.
//! * `HANDPOSE_MODEL_DIR`: Directory holding the ONNX palm detection and hand landmark networks
//!   loaded by the `handpose` binary. Defaults to `3rdparty/onnx`.
//! * `HANDPOSE_IMAGE`: Makes the `handpose` binary serve this image file instead of opening a
//!   webcam.
//!
//! [`Webcam`]: video::webcam::Webcam

use log::LevelFilter;

pub mod capture;
pub mod engine;
pub mod error;
pub mod gui;
pub mod image;
pub mod landmark;
pub mod render;
pub mod resolution;
pub mod state;
pub mod timer;
pub mod video;

mod drop;

pub use error::{Error, ErrorKind};

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and this library log at *debug* level, `wgpu` at *warn* level. `RUST_LOG`
/// is applied on top of that.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
