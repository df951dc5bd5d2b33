//! Camera frames and color conversion.
//!
//! This module provides:
//!
//! - [`RawFrame`], a frame as delivered by a [`FrameSource`], in whatever [`PixelFormat`] the
//!   source produces.
//! - [`Frame`], an owned 8-bit RGB image, the format the landmark engine consumes.
//! - [`CaptureImage`], an RGBA copy of a [`Frame`] that can be handed to the UI thread and
//!   uploaded to a GPU texture as-is.
//!
//! [`FrameSource`]: crate::video::FrameSource


use std::{fmt, path::Path};

use image::{Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::resolution::Resolution;

/// Memory layout of the pixels in a [`RawFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PixelFormat {
    /// 3 bytes per pixel, red first.
    Rgb8,
    /// 3 bytes per pixel, blue first (the usual layout of OpenCV-style capture APIs).
    Bgr8,
    /// 4 bytes per pixel, red first, alpha last.
    Rgba8,
}

impl PixelFormat {
    /// Returns the number of bytes each pixel occupies.
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// A row-major frame in a source-specific [`PixelFormat`].
#[derive(Clone)]
pub struct RawFrame {
    format: PixelFormat,
    resolution: Resolution,
    data: Vec<u8>,
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("format", &self.format)
            .field("resolution", &self.resolution)
            .field("len", &self.data.len())
            .finish()
    }
}

impl RawFrame {
    /// Wraps a pixel buffer.
    ///
    /// Returns an error if `data` does not hold exactly `width * height` pixels of `format`.
    pub fn new(format: PixelFormat, resolution: Resolution, data: Vec<u8>) -> Result<Self> {
        let expected = resolution.num_pixels() as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(Error::FrameSize {
                format,
                resolution,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            format,
            resolution,
            data,
        })
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Converts this frame to RGB.
    ///
    /// This is a pure function of the pixel data. RGB input is moved without copying.
    pub fn to_rgb(self) -> Frame {
        let (w, h) = (self.resolution.width(), self.resolution.height());
        let data = match self.format {
            PixelFormat::Rgb8 => self.data,
            PixelFormat::Bgr8 => {
                let mut data = self.data;
                for px in data.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                data
            }
            PixelFormat::Rgba8 => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        };

        // Length was validated in `RawFrame::new`, and the conversions above preserve it.
        let buf = RgbImage::from_raw(w, h, data).unwrap_or_else(|| RgbImage::new(w, h));
        Frame { buf }
    }
}

impl From<Frame> for RawFrame {
    fn from(frame: Frame) -> Self {
        Self {
            format: PixelFormat::Rgb8,
            resolution: frame.resolution(),
            data: frame.buf.into_raw(),
        }
    }
}

/// An owned 8-bit RGB image.
#[derive(Clone)]
pub struct Frame {
    buf: RgbImage,
}

impl Frame {
    /// Creates a black frame of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: RgbImage::new(width, height),
        }
    }

    /// Creates a frame by evaluating `f` at every pixel coordinate.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [u8; 3]) -> Self {
        Self {
            buf: RgbImage::from_fn(width, height, |x, y| Rgb(f(x, y))),
        }
    }

    /// Loads and decodes an image file (JPEG or PNG).
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let buf = image::open(path.as_ref())?.to_rgb8();
        Ok(Self { buf })
    }

    /// Decodes a JFIF JPEG or Motion JPEG frame.
    pub fn decode_jpeg(data: &[u8]) -> anyhow::Result<Self> {
        let buf = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgb8();
        Ok(Self { buf })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.buf.width(), self.buf.height())
    }

    /// Returns the RGB value of the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [u8; 3] {
        self.buf.get_pixel(x, y).0
    }

    /// Returns the raw row-major RGB bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.buf.as_raw()
    }

    /// Creates an opaque RGBA copy of this frame for GPU upload.
    pub fn to_rgba(&self) -> CaptureImage {
        let data = self
            .data()
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 0xff])
            .collect();
        CaptureImage {
            resolution: self.resolution(),
            data,
        }
    }
}

/// RGBA8 pixels of a captured frame, laid out the way GPU textures expect them.
#[derive(Clone)]
pub struct CaptureImage {
    resolution: Resolution,
    data: Vec<u8>,
}

impl CaptureImage {
    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
