//! A frame source that serves the same image over and over.
//!
//! Useful for running the pipeline without a camera attached.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::image::{Frame, RawFrame};
use crate::video::FrameSource;

/// Serves a fixed image at a fixed frame interval.
pub struct StillImage {
    frame: Frame,
    interval: Duration,
    next: Option<Instant>,
}

impl StillImage {
    /// 30 FPS.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(33);

    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            interval: Self::DEFAULT_INTERVAL,
            next: None,
        }
    }

    /// Loads the image to serve from a JPEG or PNG file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let frame = Frame::load(path)?;
        log::info!("serving {} ({})", path.display(), frame.resolution());
        Ok(Self::new(frame))
    }

    /// Sets the time between two frames. [`Duration::ZERO`] disables pacing.
    pub fn interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }
}

impl FrameSource for StillImage {
    fn try_read_frame(&mut self) -> Option<RawFrame> {
        let now = Instant::now();
        if let Some(next) = self.next {
            if next > now {
                thread::sleep(next - now);
            }
        }
        self.next = Some(Instant::now() + self.interval);

        Some(self.frame.clone().into())
    }
}

#[cfg(test)]
mod tests {
    use crate::image::PixelFormat;

    use super::*;

    #[test]
    fn repeats_frame() {
        let frame = Frame::from_fn(4, 3, |x, y| [x as u8, y as u8, 0]);
        let mut source = StillImage::new(frame.clone()).interval(Duration::ZERO);
        for _ in 0..3 {
            let raw = source.try_read_frame().unwrap();
            assert_eq!(raw.format(), PixelFormat::Rgb8);
            assert_eq!(raw.data(), frame.data());
        }
    }

    #[test]
    fn paces_frames() {
        let interval = Duration::from_millis(20);
        let mut source = StillImage::new(Frame::new(1, 1)).interval(interval);
        let start = Instant::now();
        source.try_read_frame().unwrap();
        source.try_read_frame().unwrap();
        source.try_read_frame().unwrap();
        assert!(start.elapsed() >= interval * 2);
    }
}
