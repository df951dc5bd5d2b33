//! V4L2 webcam access.
//!
//! Only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are supported. The
//! device picks the resolution and frame rate; no format negotiation is performed.

use std::env;

use anyhow::bail;
use linuxvideo::{
    format::{PixFormat, PixelFormat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device,
};

use crate::image::{Frame, RawFrame};
use crate::resolution::Resolution;
use crate::timer::Timer;
use crate::video::FrameSource;

/// Options for [`Webcam::open`].
#[derive(Debug, Default, Clone)]
pub struct WebcamOptions {
    name: Option<String>,
}

impl WebcamOptions {
    /// Sets the name of the webcam device to open.
    ///
    /// If no webcam with the given name can be found, opening the webcam will result in an error.
    #[inline]
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// A webcam yielding a stream of JPEG-compressed frames.
pub struct Webcam {
    stream: ReadStream,
    resolution: Resolution,
    t_dequeue: Timer,
    t_decode: Timer,
}

const ENV_VAR_WEBCAM_NAME: &str = "HANDPOSE_WEBCAM_NAME";

impl Webcam {
    /// Opens the first supported webcam found.
    ///
    /// This function can block for a significant amount of time while the webcam initializes (on
    /// the order of hundreds of milliseconds).
    pub fn open(options: WebcamOptions) -> anyhow::Result<Self> {
        if let Ok(name) = env::var(ENV_VAR_WEBCAM_NAME) {
            log::debug!(
                "webcam override: `{}` is set to '{}'",
                ENV_VAR_WEBCAM_NAME,
                name,
            );
        }
        for res in linuxvideo::list()? {
            match res {
                Ok(dev) => match Self::open_impl(dev, &options) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => {
                        log::debug!("{}", e);
                    }
                },
                Err(e) => {
                    log::warn!("{}", e);
                }
            }
        }

        bail!("no supported webcam device found")
    }

    fn open_impl(dev: Device, options: &WebcamOptions) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        let cam_name_from_env = env::var(ENV_VAR_WEBCAM_NAME).ok();
        if let Some(name) = options.name.as_deref().or(cam_name_from_env.as_deref()) {
            if caps.card() != name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );

        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let mut pixel_format = None;
        for format in dev.formats(BufType::VIDEO_CAPTURE) {
            let format = format?;
            if format.pixel_format() == PixelFormat::JPEG
                || format.pixel_format() == PixelFormat::MJPG
            {
                pixel_format = Some(format.pixel_format());
                break;
            }
        }
        let Some(pixel_format) = pixel_format else {
            log::debug!("{} has no JPEG capture format", caps.card());
            return Ok(None);
        };

        // The driver adjusts this to the closest size it supports.
        let res = Resolution::RES_480P;
        let capture = dev.video_capture(PixFormat::new(res.width(), res.height(), pixel_format))?;
        let format = capture.format();
        let resolution = Resolution::new(format.width(), format.height());

        log::info!("opened {} ({}) at {}", caps.card(), path.display(), resolution);

        let stream = capture.into_stream()?;

        Ok(Some(Self {
            stream,
            resolution,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    /// Returns the resolution the device delivers frames at.
    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Reads the next frame from the camera.
    ///
    /// If no frame is available, this method will block until one is.
    pub fn read(&mut self) -> anyhow::Result<Frame> {
        let dequeue_guard = self.t_dequeue.start();
        let t_decode = &self.t_decode;
        let frame = self.stream.dequeue(|buf| {
            drop(dequeue_guard);
            // Even good webcams produce the occasional corrupted MJPG frame (presumably USB data
            // corruption), so this is reported per frame and not as a stream error.
            Ok(t_decode.time(|| Frame::decode_jpeg(&buf)))
        })??;
        Ok(frame)
    }
}

impl FrameSource for Webcam {
    fn try_read_frame(&mut self) -> Option<RawFrame> {
        match self.read() {
            Ok(frame) => Some(frame.into()),
            Err(e) => {
                log::debug!("webcam read failed: {e}");
                None
            }
        }
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_dequeue, &self.t_decode]
    }
}
