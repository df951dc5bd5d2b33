//! Drawing the landmark skeleton and the camera image.
//!
//! [`Renderer::on_frame`] is the per-tick entry point for the UI shell. It pulls the latest state
//! out of [`SharedLandmarkState`] and mirrors it into GPU resources through a [`Backend`]. Since
//! the renderer is only ever called from the UI thread, that thread is the only one mutating GPU
//! state.

pub mod geometry;
pub mod gpu;
pub mod texture;

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::image::CaptureImage;
use crate::resolution::Resolution;
use crate::state::{PipelineState, SharedLandmarkState};

use self::geometry::GeometryBuffer;
use self::texture::CaptureTexture;

/// A landmark position as uploaded to the GPU: normalized `x` and `y`, origin at the top left.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
}

impl Vertex {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { position: [x, y] }
    }
}

/// The GPU operations needed by the [`Renderer`].
///
/// All methods are called from the thread that owns the [`Renderer`].
pub trait Backend {
    /// A GPU vertex buffer holding [`Vertex`] data.
    type Points;
    /// A GPU texture holding an RGBA8 image.
    type Texture;

    /// Performs one-time setup (shaders, pipelines).
    ///
    /// Called once, before any other method. If this fails, the backend is not used again.
    fn init(&mut self) -> anyhow::Result<()>;

    /// Creates a vertex buffer with room for `capacity` vertices.
    fn create_points(&mut self, capacity: usize) -> anyhow::Result<Self::Points>;

    /// Overwrites the start of `points` with `vertices`.
    fn write_points(&mut self, points: &mut Self::Points, vertices: &[Vertex]);

    /// Allocates a texture of the given size. Its contents are undefined until written.
    fn create_texture(&mut self, res: Resolution) -> anyhow::Result<Self::Texture>;

    /// Uploads `image` into `texture`, which was created with the same resolution.
    fn write_texture(&mut self, texture: &mut Self::Texture, image: &CaptureImage);

    /// Renders one frame of size `target`: the `background` image stretched over the whole
    /// target (if any), and the first `count` vertices of `points` on top of it.
    fn draw(
        &mut self,
        target: Resolution,
        background: Option<&Self::Texture>,
        points: &Self::Points,
        count: u32,
    ) -> anyhow::Result<()>;
}

/// What a call to [`Renderer::on_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Number of landmark points drawn.
    pub points: u32,
    /// Whether the landmark vertex buffer was uploaded.
    pub geometry_uploaded: bool,
    /// Whether a new camera image was uploaded.
    pub texture_updated: bool,
    /// Whether anything was drawn at all.
    pub drawn: bool,
}

enum Resources<B: Backend> {
    Uninit,
    Ready {
        geometry: GeometryBuffer<B>,
        texture: CaptureTexture<B>,
    },
    /// Initialization failed; nothing will be drawn.
    Failed,
}

/// Draws the 21 landmarks of the first detected hand over the latest camera image.
pub struct Renderer<B: Backend> {
    backend: B,
    shared: Arc<SharedLandmarkState>,
    resources: Resources<B>,
    /// State that came with the displayed landmarks.
    state: PipelineState,
}

impl<B: Backend> Renderer<B> {
    /// Creates a renderer. No GPU resources are created until the first [`Renderer::on_frame`].
    pub fn new(backend: B, shared: Arc<SharedLandmarkState>) -> Self {
        Self {
            backend,
            shared,
            resources: Resources::Uninit,
            state: PipelineState::Uninitialized,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Returns the pipeline state as of the landmarks drawn by the last [`Renderer::on_frame`].
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Returns `true` if GPU setup has failed and the renderer has stopped drawing.
    pub fn is_failed(&self) -> bool {
        matches!(self.resources, Resources::Failed)
    }

    fn init(&mut self) -> anyhow::Result<()> {
        self.backend.init()?;
        let geometry = GeometryBuffer::new(&mut self.backend)?;
        self.resources = Resources::Ready {
            geometry,
            texture: CaptureTexture::new(),
        };
        Ok(())
    }

    /// Renders one UI frame into a target of `width` by `height` pixels.
    ///
    /// Never fails: if GPU setup fails, the renderer logs the error and draws nothing from then
    /// on, and errors during a single frame only affect that frame.
    pub fn on_frame(&mut self, width: u32, height: u32) -> FrameStats {
        if let Resources::Uninit = self.resources {
            if let Err(e) = self.init() {
                log::error!("failed to initialize renderer, visualization disabled: {e:#}");
                self.resources = Resources::Failed;
            }
        }

        let Resources::Ready { geometry, texture } = &mut self.resources else {
            self.state = self.shared.state();
            return FrameStats::default();
        };
        let mut stats = FrameStats::default();

        let (snapshot, state) = self.shared.read_with_state();
        self.state = state;
        if snapshot.changed() {
            match snapshot.value().and_then(|result| result.first()) {
                Some(hand) => {
                    if let Err(e) = geometry.update(hand.landmarks()) {
                        log::error!("discarding landmarks: {e}");
                        geometry.clear();
                    }
                }
                None => geometry.clear(),
            }
        }
        stats.geometry_uploaded = geometry.ensure_uploaded(&mut self.backend);

        let frame = self.shared.read_frame();
        if frame.changed() {
            if let Some(image) = frame.value() {
                match texture.upload(&mut self.backend, image) {
                    Ok(()) => stats.texture_updated = true,
                    Err(e) => log::error!("failed to upload camera image: {e:#}"),
                }
            }
        }

        let target = Resolution::new(width, height);
        if target.is_empty() {
            // Minimized or collapsed panel.
            return stats;
        }

        let count = geometry.len() as u32;
        match self
            .backend
            .draw(target, texture.get(), geometry.points(), count)
        {
            Ok(()) => {
                stats.points = count;
                stats.drawn = true;
            }
            Err(e) => log::error!("failed to draw frame: {e:#}"),
        }

        stats
    }
}

#[cfg(test)]
pub(crate) mod mock;
