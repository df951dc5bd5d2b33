use std::{env, path::PathBuf, sync::Arc};

use handpose::capture::{self, CaptureOptions};
use handpose::engine::{onnx::OnnxLandmarkEngine, EngineOptions, LandmarkEngine};
use handpose::gui;
use handpose::state::SharedLandmarkState;
use handpose::video::{
    still::StillImage,
    webcam::{Webcam, WebcamOptions},
    FrameSource,
};

const ENV_VAR_MODEL_DIR: &str = "HANDPOSE_MODEL_DIR";
const ENV_VAR_IMAGE: &str = "HANDPOSE_IMAGE";

fn model_dir() -> PathBuf {
    match env::var_os(ENV_VAR_MODEL_DIR) {
        Some(path) => path.into(),
        None => ["3rdparty", "onnx"].iter().collect(),
    }
}

fn open() -> anyhow::Result<(Box<dyn FrameSource>, Box<dyn LandmarkEngine>)> {
    let options = EngineOptions::default();
    let engine = OnnxLandmarkEngine::open_dir(model_dir(), options)?;

    let source: Box<dyn FrameSource> = match env::var_os(ENV_VAR_IMAGE) {
        Some(path) => Box::new(StillImage::load(path)?),
        None => Box::new(Webcam::open(WebcamOptions::default())?),
    };

    Ok((source, Box::new(engine)))
}

fn main() -> anyhow::Result<()> {
    handpose::init_logger!();

    let shared = Arc::new(SharedLandmarkState::new());
    let capture = capture::spawn_with(shared.clone(), CaptureOptions::default(), open)?;

    gui::run(shared, capture)
}
