//! The GPU copy of the most recent camera image.

use crate::image::CaptureImage;
use crate::resolution::Resolution;

use super::Backend;

/// A lazily allocated texture that follows the size of the images written to it.
pub struct CaptureTexture<B: Backend> {
    texture: Option<B::Texture>,
    res: Resolution,
}

impl<B: Backend> Default for CaptureTexture<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> CaptureTexture<B> {
    /// Creates an empty texture handle. Nothing is allocated until the first upload.
    pub fn new() -> Self {
        Self {
            texture: None,
            res: Resolution::default(),
        }
    }

    /// Makes sure the texture has resolution `res`, reallocating it if needed.
    ///
    /// Returns whether a new texture was allocated.
    pub fn ensure_sized(&mut self, backend: &mut B, res: Resolution) -> anyhow::Result<bool> {
        if self.texture.is_some() && self.res == res {
            return Ok(false);
        }

        log::trace!("reallocating capture texture ({} -> {})", self.res, res);
        self.texture = None;
        self.texture = Some(backend.create_texture(res)?);
        self.res = res;
        Ok(true)
    }

    /// Uploads `image`, resizing the texture to match it first.
    ///
    /// Empty images are ignored.
    pub fn upload(&mut self, backend: &mut B, image: &CaptureImage) -> anyhow::Result<()> {
        let res = image.resolution();
        if res.is_empty() {
            return Ok(());
        }

        self.ensure_sized(backend, res)?;
        if let Some(texture) = &mut self.texture {
            backend.write_texture(texture, image);
        }
        Ok(())
    }

    /// Returns the texture, or `None` if no image was uploaded yet.
    #[inline]
    pub fn get(&self) -> Option<&B::Texture> {
        self.texture.as_ref()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.res
    }
}

#[cfg(test)]
mod tests {
    use crate::image::Frame;
    use crate::render::mock::{Call, MockBackend};

    use super::*;

    #[test]
    fn allocates_lazily_and_on_resize() {
        let mut backend = MockBackend::default();
        let mut texture = CaptureTexture::new();
        assert!(texture.get().is_none());

        assert!(texture.ensure_sized(&mut backend, Resolution::new(4, 2)).unwrap());
        assert!(!texture.ensure_sized(&mut backend, Resolution::new(4, 2)).unwrap());
        assert!(texture.ensure_sized(&mut backend, Resolution::new(2, 4)).unwrap());
        assert_eq!(texture.resolution(), Resolution::new(2, 4));
        assert_eq!(texture.get().unwrap().res, Resolution::new(2, 4));
    }

    #[test]
    fn upload_follows_image_size() {
        let mut backend = MockBackend::default();
        let mut texture = CaptureTexture::new();

        texture.upload(&mut backend, &Frame::new(3, 3).to_rgba()).unwrap();
        texture.upload(&mut backend, &Frame::new(0, 0).to_rgba()).unwrap();
        texture.upload(&mut backend, &Frame::new(5, 1).to_rgba()).unwrap();

        assert_eq!(
            backend.calls,
            [
                Call::CreateTexture(Resolution::new(3, 3)),
                Call::WriteTexture(Resolution::new(3, 3)),
                Call::CreateTexture(Resolution::new(5, 1)),
                Call::WriteTexture(Resolution::new(5, 1)),
            ]
        );
    }
}
