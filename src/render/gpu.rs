//! `wgpu` implementation of the render [`Backend`].
//!
//! Frames are rendered into an offscreen RGBA texture, which the UI shell then presents or embeds
//! wherever it wants (see [`WgpuBackend::present`]).

use std::{mem, rc::Rc, sync::Arc};

use anyhow::{anyhow, bail};
use bytemuck::{Pod, Zeroable};
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt as _},
    *,
};

use crate::image::CaptureImage;
use crate::resolution::Resolution;

use super::{Backend, Vertex};

const BACKGROUND: Color = Color::BLACK;

/// Format of the offscreen target and of camera textures.
const FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;

/// Radius of a landmark point, in pixels.
const POINT_RADIUS: f32 = 4.0;

// The OpenGL backend panics spuriously, so don't enable it.
const BACKENDS: Backends = Backends::PRIMARY;

/// An open graphics device.
pub struct Gpu {
    instance: Arc<Instance>,
    adapter: Arc<Adapter>,
    device: Arc<Device>,
    queue: Arc<Queue>,
}

impl Gpu {
    /// Creates the [`Instance`] to open a [`Gpu`] (and window surfaces) with.
    pub fn create_instance() -> Instance {
        Instance::new(InstanceDescriptor {
            backends: BACKENDS,
            ..Default::default()
        })
    }

    /// Opens a suitable default GPU that can render to `compatible_surface`, if given.
    pub async fn open(
        instance: Instance,
        compatible_surface: Option<&Surface>,
    ) -> anyhow::Result<Self> {
        log::info!("available graphics adapters:");
        for adapter in instance.enumerate_adapters(BACKENDS) {
            log_adapter("-", &adapter.get_info());
        }

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                compatible_surface,
                ..Default::default()
            })
            .await
            .ok_or_else(|| anyhow!("no graphics adapter found"))?;
        log_adapter("using", &adapter.get_info());
        log::debug!("adapter limits: {:?}", adapter.limits());

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: None,
                    features: Features::empty(),
                    limits: Limits::downlevel_defaults().using_resolution(adapter.limits()),
                },
                None,
            )
            .await?;

        Ok(Self {
            instance: Arc::new(instance),
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn adapter(&self) -> &Arc<Adapter> {
        &self.adapter
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }
}

fn log_adapter(prefix: &str, info: &AdapterInfo) {
    let backend = match info.backend {
        wgpu::Backend::Empty => "dummy",
        wgpu::Backend::Vulkan => "Vulkan",
        wgpu::Backend::Metal => "Metal",
        wgpu::Backend::Dx12 => "DX12",
        wgpu::Backend::Dx11 => "DX11",
        wgpu::Backend::Gl => "OpenGL",
        wgpu::Backend::BrowserWebGpu => "WebGPU",
    };
    let device_type = match info.device_type {
        DeviceType::Other => "Unknown",
        DeviceType::IntegratedGpu => "iGPU",
        DeviceType::DiscreteGpu => "dGPU",
        DeviceType::VirtualGpu => "vGPU",
        DeviceType::Cpu => "CPU",
    };
    log::info!("{} [{}] [{}] {}", prefix, backend, device_type, info.name);
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
struct PointUniforms {
    radius: [f32; 2],
    _pad: [f32; 2],
}

struct Pipelines {
    /// Draws one small disc per instance.
    points: RenderPipeline,
    /// Draws a full-target texture.
    quad: RenderPipeline,
    quad_shader: ShaderModule,
    quad_layout: PipelineLayout,
    texture_layout: BindGroupLayout,
    sampler: Sampler,
    uniforms: Buffer,
    uniforms_bind_group: BindGroup,
}

impl Pipelines {
    fn create(device: &Device) -> Self {
        let point_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("point_shader"),
            source: ShaderSource::Wgsl(include_str!("points.wgsl").into()),
        });
        let quad_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("quad_shader"),
            source: ShaderSource::Wgsl(include_str!("quad.wgsl").into()),
        });

        let uniforms_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("point_uniforms"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("texture"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: false },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });

        let uniforms = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("point_uniforms"),
            contents: bytemuck::bytes_of(&PointUniforms::default()),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        let uniforms_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("point_uniforms"),
            layout: &uniforms_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }],
        });

        let points = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("points"),
            layout: Some(
                &device.create_pipeline_layout(&PipelineLayoutDescriptor {
                    label: None,
                    bind_group_layouts: &[&uniforms_layout],
                    push_constant_ranges: &[],
                }),
            ),
            vertex: VertexState {
                module: &point_shader,
                entry_point: "vert",
                buffers: &[VertexBufferLayout {
                    array_stride: mem::size_of::<Vertex>() as BufferAddress,
                    step_mode: VertexStepMode::Instance,
                    attributes: &vertex_attr_array![0 => Float32x2],
                }],
            },
            fragment: Some(FragmentState {
                module: &point_shader,
                entry_point: "frag",
                targets: &[Some(FORMAT.into())],
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        });

        let quad_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[&texture_layout],
            push_constant_ranges: &[],
        });
        let quad = quad_pipeline(device, &quad_shader, &quad_layout, FORMAT);

        Self {
            points,
            quad,
            quad_shader,
            quad_layout,
            texture_layout,
            sampler: device.create_sampler(&SamplerDescriptor::default()),
            uniforms,
            uniforms_bind_group,
        }
    }

    fn texture_bind_group(&self, device: &Device, texture: &Texture) -> BindGroup {
        device.create_bind_group(&BindGroupDescriptor {
            label: Some("texture"),
            layout: &self.texture_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(
                        &texture.create_view(&Default::default()),
                    ),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

fn quad_pipeline(
    device: &Device,
    shader: &ShaderModule,
    layout: &PipelineLayout,
    format: TextureFormat,
) -> RenderPipeline {
    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("textured_quad"),
        layout: Some(layout),
        vertex: VertexState {
            module: shader,
            entry_point: "vert",
            buffers: &[],
        },
        fragment: Some(FragmentState {
            module: shader,
            entry_point: "frag",
            targets: &[Some(ColorTargetState {
                format,
                write_mask: ColorWrites::ALL,
                blend: None,
            })],
        }),
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState::default(),
        multiview: None,
    })
}

/// A texture that can be drawn as a full-target quad.
pub struct GpuTexture {
    texture: Texture,
    bind_group: BindGroup,
    res: Resolution,
}

impl GpuTexture {
    fn create(
        gpu: &Gpu,
        pipelines: &Pipelines,
        label: &str,
        res: Resolution,
        usage: TextureUsages,
    ) -> Self {
        let texture = gpu.device().create_texture(&TextureDescriptor {
            label: Some(label),
            size: extent(res),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: FORMAT,
            usage,
            view_formats: &[],
        });
        let bind_group = pipelines.texture_bind_group(gpu.device(), &texture);
        Self {
            texture,
            bind_group,
            res,
        }
    }

    #[inline]
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.res
    }
}

fn extent(res: Resolution) -> Extent3d {
    Extent3d {
        width: res.width(),
        height: res.height(),
        depth_or_array_layers: 1,
    }
}

/// Renders landmarks and camera images with `wgpu`.
pub struct WgpuBackend {
    gpu: Rc<Gpu>,
    pipelines: Option<Pipelines>,
    /// The offscreen texture frames are rendered into.
    target: Option<GpuTexture>,
    /// Pipeline copying `target` to a surface, and the surface format it was created for.
    blit: Option<(TextureFormat, RenderPipeline)>,
}

impl WgpuBackend {
    pub fn new(gpu: Rc<Gpu>) -> Self {
        Self {
            gpu,
            pipelines: None,
            target: None,
            blit: None,
        }
    }

    pub fn gpu(&self) -> &Rc<Gpu> {
        &self.gpu
    }

    /// Returns the texture holding the most recently drawn frame.
    pub fn target(&self) -> Option<&GpuTexture> {
        self.target.as_ref()
    }

    fn pipelines(&self) -> anyhow::Result<&Pipelines> {
        self.pipelines
            .as_ref()
            .ok_or_else(|| anyhow!("render backend is not initialized"))
    }

    /// Copies the most recently drawn frame to `view`, stretching it over the whole view.
    ///
    /// If nothing was drawn yet (or initialization failed), `view` is cleared instead.
    pub fn present(&mut self, view: &TextureView, format: TextureFormat) {
        let blit = match (&self.target, &self.pipelines) {
            (Some(target), Some(pipelines)) => {
                if self.blit.as_ref().map_or(true, |(f, _)| *f != format) {
                    log::debug!("creating blit pipeline for {:?}", format);
                    let pipeline = quad_pipeline(
                        self.gpu.device(),
                        &pipelines.quad_shader,
                        &pipelines.quad_layout,
                        format,
                    );
                    self.blit = Some((format, pipeline));
                }
                self.blit
                    .as_ref()
                    .map(|(_, pipeline)| (pipeline, &target.bind_group))
            }
            _ => None,
        };

        let mut encoder = self
            .gpu
            .device()
            .create_command_encoder(&CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("present"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(BACKGROUND),
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
            if let Some((pipeline, bind_group)) = blit {
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.gpu.queue().submit([encoder.finish()]);
    }
}

impl Backend for WgpuBackend {
    type Points = Buffer;
    type Texture = GpuTexture;

    fn init(&mut self) -> anyhow::Result<()> {
        let device = self.gpu.device();
        device.push_error_scope(ErrorFilter::Validation);
        let pipelines = Pipelines::create(device);
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            bail!("failed to create render pipelines: {error}");
        }

        log::debug!("render pipelines created");
        self.pipelines = Some(pipelines);
        Ok(())
    }

    fn create_points(&mut self, capacity: usize) -> anyhow::Result<Buffer> {
        Ok(self.gpu.device().create_buffer(&BufferDescriptor {
            label: Some("landmark_points"),
            size: (capacity * mem::size_of::<Vertex>()) as BufferAddress,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn write_points(&mut self, points: &mut Buffer, vertices: &[Vertex]) {
        self.gpu
            .queue()
            .write_buffer(points, 0, bytemuck::cast_slice(vertices));
    }

    fn create_texture(&mut self, res: Resolution) -> anyhow::Result<GpuTexture> {
        let pipelines = self.pipelines()?;
        Ok(GpuTexture::create(
            &self.gpu,
            pipelines,
            "capture_texture",
            res,
            TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        ))
    }

    fn write_texture(&mut self, texture: &mut GpuTexture, image: &CaptureImage) {
        let size = extent(texture.res);
        self.gpu.queue().write_texture(
            ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: Origin3d::default(),
                aspect: TextureAspect::All,
            },
            image.data(),
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(size.width * 4),
                rows_per_image: None,
            },
            size,
        );
    }

    fn draw(
        &mut self,
        target: Resolution,
        background: Option<&GpuTexture>,
        points: &Buffer,
        count: u32,
    ) -> anyhow::Result<()> {
        let pipelines = self
            .pipelines
            .as_ref()
            .ok_or_else(|| anyhow!("render backend is not initialized"))?;

        let dest = match &mut self.target {
            Some(dest) if dest.res == target => dest,
            slot => {
                log::trace!(
                    "reallocating render target ({} -> {})",
                    slot.as_ref().map_or(Resolution::default(), |t| t.res),
                    target,
                );
                slot.insert(GpuTexture::create(
                    &self.gpu,
                    pipelines,
                    "render_target",
                    target,
                    TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
                ))
            }
        };

        let uniforms = PointUniforms {
            radius: [
                POINT_RADIUS * 2.0 / target.width() as f32,
                POINT_RADIUS * 2.0 / target.height() as f32,
            ],
            _pad: [0.0; 2],
        };
        self.gpu
            .queue()
            .write_buffer(&pipelines.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let view = dest.texture.create_view(&Default::default());
        let mut encoder = self
            .gpu
            .device()
            .create_command_encoder(&CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("landmarks"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(BACKGROUND),
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });

            if let Some(background) = background {
                pass.set_pipeline(&pipelines.quad);
                pass.set_bind_group(0, &background.bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            if count > 0 {
                pass.set_pipeline(&pipelines.points);
                pass.set_bind_group(0, &pipelines.uniforms_bind_group, &[]);
                pass.set_vertex_buffer(0, points.slice(..));
                pass.draw(0..6, 0..count);
            }
        }
        self.gpu.queue().submit([encoder.finish()]);

        Ok(())
    }
}
