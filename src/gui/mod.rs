//! The window the landmark view is shown in.
//!
//! This is a thin shell: it owns the event loop and the window surface, calls
//! [`Renderer::on_frame`] once per redraw, and copies the rendered frame to the window.

use std::{rc::Rc, sync::Arc};

use anyhow::anyhow;
use wgpu::{CompositeAlphaMode, PresentMode, Surface, SurfaceConfiguration, SurfaceError};
use wgpu::{TextureFormat, TextureUsages};
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

use crate::capture::{panic_message, CaptureHandle};
use crate::render::gpu::{Gpu, WgpuBackend};
use crate::render::Renderer;
use crate::resolution::Resolution;
use crate::state::{PipelineState, SharedLandmarkState};
use crate::timer::FpsCounter;

const TITLE: &str = "handpose";

/// A window with a `wgpu` surface.
struct View {
    gpu: Rc<Gpu>,
    surface: Surface,
    format: TextureFormat,

    /// Surface must be destroyed before `Window`.
    window: Window,
}

impl View {
    fn open(event_loop: &EventLoop<()>, resolution: Resolution) -> anyhow::Result<Self> {
        let window = WindowBuilder::new()
            .with_inner_size(PhysicalSize::new(resolution.width(), resolution.height()))
            .with_title(TITLE)
            .build(event_loop)?;

        let instance = Gpu::create_instance();
        let surface = unsafe { instance.create_surface(&window)? };
        let gpu = pollster::block_on(Gpu::open(instance, Some(&surface)))?;
        let format = *surface
            .get_capabilities(gpu.adapter())
            .formats
            .first()
            .ok_or_else(|| anyhow!("adapter cannot render to window surface"))?;

        let this = Self {
            gpu: Rc::new(gpu),
            surface,
            format,
            window,
        };
        this.configure();
        Ok(this)
    }

    fn size(&self) -> Resolution {
        let size = self.window.inner_size();
        Resolution::new(size.width, size.height)
    }

    fn configure(&self) {
        let size = self.size();
        if size.is_empty() {
            return;
        }

        log::debug!(
            "configuring window surface at {} (format: {:?})",
            size,
            self.format
        );
        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: self.format,
            width: size.width(),
            height: size.height(),
            present_mode: PresentMode::Fifo,
            alpha_mode: CompositeAlphaMode::Auto,
            view_formats: Vec::new(),
        };
        self.surface.configure(self.gpu.device(), &config);
    }

    fn redraw(&self, renderer: &mut Renderer<WgpuBackend>) {
        let size = self.size();
        renderer.on_frame(size.width(), size.height());
        if size.is_empty() {
            return;
        }

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err @ (SurfaceError::Outdated | SurfaceError::Lost)) => {
                log::debug!("surface error: {}", err);
                self.configure();
                match self.surface.get_current_texture() {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("failed to acquire frame after reconfiguring surface: {}", e);
                        return;
                    }
                }
            }
            Err(e) => {
                log::warn!("failed to acquire frame: {}", e);
                return;
            }
        };

        let view = frame.texture.create_view(&Default::default());
        renderer.backend_mut().present(&view, self.format);
        frame.present();
    }
}

struct Gui {
    capture: Option<CaptureHandle>,
    renderer: Option<Renderer<WgpuBackend>>,
    view: Option<View>,
    title_state: Option<PipelineState>,
    fps: FpsCounter,
}

impl Gui {
    fn redraw(&mut self) {
        let (Some(view), Some(renderer)) = (&self.view, &mut self.renderer) else {
            return;
        };

        let state = renderer.state();
        if self.title_state != Some(state) {
            view.window.set_title(&format!("{TITLE} ({state})"));
            self.title_state = Some(state);
        }

        view.redraw(renderer);
        self.fps.tick();
    }

    /// Stops the capture thread and waits for it to exit.
    fn stop_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            log::debug!("stopping capture");
            if let Err(payload) = capture.join() {
                log::error!("capture thread panicked: {}", panic_message(&*payload));
            }
        }
    }

    /// Releases everything in order: capture thread, then GPU resources, then the window.
    fn teardown(&mut self) {
        self.stop_capture();
        drop(self.renderer.take());
        drop(self.view.take());
        log::debug!("gui shut down");
    }
}

/// Opens the landmark window and runs the UI event loop on the calling thread.
///
/// `capture` is stopped and joined when the window is closed, before any GPU resources are
/// released. This only returns if the window cannot be opened; otherwise the process exits when
/// the window is closed.
pub fn run(shared: Arc<SharedLandmarkState>, capture: CaptureHandle) -> anyhow::Result<()> {
    let event_loop = EventLoop::new();
    let view = View::open(&event_loop, Resolution::RES_480P)?;
    let renderer = Renderer::new(WgpuBackend::new(view.gpu.clone()), shared);

    let mut gui = Gui {
        capture: Some(capture),
        renderer: Some(renderer),
        view: Some(view),
        title_state: None,
        fps: FpsCounter::new("render"),
    };

    event_loop.run(move |event, _target, flow| {
        *flow = ControlFlow::Poll;
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    gui.stop_capture();
                    *flow = ControlFlow::Exit;
                }
                WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                    if let Some(view) = &gui.view {
                        view.configure();
                    }
                }
                _ => {}
            },
            Event::MainEventsCleared => {
                if let Some(view) = &gui.view {
                    view.window.request_redraw();
                }
            }
            Event::RedrawRequested(_) => gui.redraw(),
            Event::LoopDestroyed => gui.teardown(),
            _ => {}
        }
    })
}
