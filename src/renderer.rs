//! wgpu Renderer module
//!
//! Implements [`GpuBackend`] on wgpu: eye targets, MSAA resolve, blits into
//! the window (with optional lens warp), wireframe lines, and the egui
//! overlay. Work is recorded into one command encoder per frame and
//! submitted by [`WgpuBackend::present`].

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use egui_wgpu::wgpu;
use glam::Mat4;
use log::{info, warn};
use wgpu::util::DeviceExt;
use wgpu::{
    Backends, BindGroupLayout, CommandEncoder, Device, DeviceDescriptor, Instance, InstanceDescriptor, Queue,
    RenderPipeline, Sampler, Surface, SurfaceConfiguration, SurfaceTexture, TextureFormat, TextureUsages,
    TextureView,
};
use winit::window::Window;

use crate::error::GpuError;
use crate::gpu::{BlitFilter, BlitTarget, GpuBackend, GpuTarget, LineVertex, Rect, TargetDesc, TargetFormat};

const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Sample counts usable for both the color and the depth format.
fn common_sample_counts(color: wgpu::TextureFormatFeatureFlags, depth: wgpu::TextureFormatFeatureFlags) -> Vec<u32> {
    [1, 2, 4, 8]
        .into_iter()
        .filter(|&n| color.sample_count_supported(n) && depth.sample_count_supported(n))
        .collect()
}

// Blit uniforms
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlitUniforms {
    src_rect: [f32; 4], // uv offset (xy) and size (zw)
    lens: [f32; 4],     // k1, k2, enabled, scale
}

// Line uniforms
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LineUniforms {
    mvp: [[f32; 4]; 4],
}

/// Render target owned by [`WgpuBackend`]. Dropping it releases the texture
/// once submitted work no longer uses it.
pub struct GpuTexture {
    desc: TargetDesc,
    texture: wgpu::Texture,
    view: Arc<TextureView>,
}

impl GpuTexture {
    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn format(&self) -> TextureFormat {
        self.texture.format()
    }
}

impl GpuTarget for GpuTexture {
    fn desc(&self) -> &TargetDesc {
        &self.desc
    }
}

pub struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct BoundTarget {
    color: Arc<TextureView>,
    depth: Option<Arc<TextureView>>,
    format: TextureFormat,
    sample_count: u32,
    viewport: Rect,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct LinePipelineKey {
    format: TextureFormat,
    sample_count: u32,
    depth: bool,
}

pub struct Renderer {
    window: Arc<Window>,
    surface: Surface<'static>,
    device: Device,
    queue: Queue,
    config: SurfaceConfiguration,

    encoder: Option<CommandEncoder>,
    frame: Option<(SurfaceTexture, Arc<TextureView>)>,
    bound: Option<BoundTarget>,

    // Blits
    blit_shader: wgpu::ShaderModule,
    blit_layout: BindGroupLayout,
    blit_pipelines: HashMap<TextureFormat, RenderPipeline>,
    nearest_sampler: Sampler,
    linear_sampler: Sampler,

    // Wireframe lines
    line_shader: wgpu::ShaderModule,
    line_layout: BindGroupLayout,
    line_pipelines: HashMap<LinePipelineKey, RenderPipeline>,

    // MSAA counts valid for eye targets on this device
    sample_counts: Vec<u32>,

    // UI Renderer
    egui_renderer: egui_wgpu::Renderer,
}

/// The wgpu implementation of the GPU seam.
pub type WgpuBackend = Renderer;

impl Renderer {
    pub async fn new(window: Arc<Window>) -> Result<Self, GpuError> {
        let size = window.inner_size();

        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|e| GpuError::Allocation(format!("surface: {}", e)))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| GpuError::Allocation("no compatible GPU adapter".into()))?;
        info!("GPU adapter: {:?}", adapter.get_info());

        // Adapter-specific format features unlock MSAA counts beyond 4x.
        let features = adapter.features() & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    required_features: features,
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| GpuError::Allocation(format!("device: {}", e)))?;

        let format_flags = |format: TextureFormat| {
            if features.is_empty() {
                format.guaranteed_format_features(features).flags
            } else {
                adapter.get_texture_format_features(format).flags
            }
        };
        let sample_counts = common_sample_counts(format_flags(COLOR_FORMAT), format_flags(DEPTH_FORMAT));
        info!("Eye target sample counts: {:?}", sample_counts);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(TextureFormat::is_srgb)
            .unwrap_or(surface_caps.formats[0]);

        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let sampler = |filter: wgpu::FilterMode, label: &str| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let nearest_sampler = sampler(wgpu::FilterMode::Nearest, "Nearest Sampler");
        let linear_sampler = sampler(wgpu::FilterMode::Linear, "Linear Sampler");

        let line_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Line Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/lines.wgsl").into()),
        });
        let line_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Line Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            encoder: None,
            frame: None,
            bound: None,
            blit_shader,
            blit_layout,
            blit_pipelines: HashMap::new(),
            nearest_sampler,
            linear_sampler,
            line_shader,
            line_layout,
            line_pipelines: HashMap::new(),
            sample_counts,
            egui_renderer,
        })
    }

    pub fn supports_sample_count(&self, count: u32) -> bool {
        self.sample_counts.contains(&count)
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            // A pending frame belongs to the old configuration.
            self.frame = None;
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    fn encoder(&mut self) -> &mut CommandEncoder {
        frame_encoder(&mut self.encoder, &self.device)
    }

    /// View of this frame's swap chain image, acquired on first use.
    fn window_view(&mut self) -> Option<Arc<TextureView>> {
        if self.frame.is_none() {
            match self.surface.get_current_texture() {
                Ok(output) => {
                    let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
                    self.frame = Some((output, Arc::new(view)));
                }
                Err(err) => {
                    warn!("Surface unavailable ({}), reconfiguring", err);
                    self.surface.configure(&self.device, &self.config);
                    return None;
                }
            }
        }
        self.frame.as_ref().map(|(_, view)| Arc::clone(view))
    }

    /// Clear the window; used when there is nothing to mirror.
    pub fn clear_window(&mut self, color: [f32; 4]) {
        let Some(view) = self.window_view() else {
            return;
        };
        let _pass = self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Window Clear Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(to_wgpu_color(color)),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    fn ensure_blit_pipeline(&mut self, format: TextureFormat) {
        let (device, shader, layout) = (&self.device, &self.blit_shader, &self.blit_layout);
        self.blit_pipelines.entry(format).or_insert_with(|| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Blit Pipeline Layout"),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Blit Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        });
    }

    fn ensure_line_pipeline(&mut self, key: LinePipelineKey) {
        let (device, shader, layout) = (&self.device, &self.line_shader, &self.line_layout);
        self.line_pipelines.entry(key).or_insert_with(|| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Line Pipeline Layout"),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Line Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs_main"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<LineVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x4],
                    }],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: key.format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::LineList,
                    ..Default::default()
                },
                depth_stencil: key.depth.then(|| wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: key.sample_count,
                    ..Default::default()
                },
                multiview: None,
                cache: None,
            })
        });
    }

    /// Draw the egui output on top of whatever is in the window.
    pub fn render_egui(&mut self, ctx: &egui::Context, full_output: egui::FullOutput) {
        let Some(view) = self.window_view() else {
            return;
        };
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: ctx.pixels_per_point(),
        };
        let paint_jobs = ctx.tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer.update_texture(&self.device, &self.queue, *id, delta);
        }

        let encoder = frame_encoder(&mut self.encoder, &self.device);
        self.egui_renderer
            .update_buffers(&self.device, &self.queue, encoder, &paint_jobs, &screen_descriptor);

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("UI Render Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();
            self.egui_renderer.render(&mut render_pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }

    /// Submit recorded work and show the window image, if one was drawn.
    pub fn present(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        if let Some((output, _)) = self.frame.take() {
            output.present();
        }
    }
}

impl GpuBackend for Renderer {
    type Texture = GpuTexture;
    type Mesh = GpuMesh;

    fn create_target(&mut self, desc: &TargetDesc) -> Result<GpuTexture, GpuError> {
        desc.validate()?;
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width > max || desc.height > max {
            return Err(GpuError::InvalidSize {
                label: desc.label,
                width: desc.width,
                height: desc.height,
            });
        }

        if !self.supports_sample_count(desc.sample_count) {
            return Err(GpuError::UnsupportedSampleCount(desc.sample_count));
        }

        let (format, usage) = match (desc.format, desc.sample_count) {
            (TargetFormat::Color, 1) => (COLOR_FORMAT, TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING),
            (TargetFormat::Color, _) => (COLOR_FORMAT, TextureUsages::RENDER_ATTACHMENT),
            (TargetFormat::Depth, _) => (DEPTH_FORMAT, TextureUsages::RENDER_ATTACHMENT),
        };

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: desc.sample_count,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let invalid = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = invalid.or(out_of_memory) {
            return Err(GpuError::Allocation(format!("{}: {}", desc.label, err)));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuTexture {
            desc: *desc,
            texture,
            view: Arc::new(view),
        })
    }

    fn window_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn bind_target(&mut self, color: &GpuTexture, depth: Option<&GpuTexture>, viewport: Rect, clear: Option<[f32; 4]>) {
        if let Some(rgba) = clear {
            let _pass = self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Target Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(to_wgpu_color(rgba)),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth.map(|d| wgpu::RenderPassDepthStencilAttachment {
                    view: &d.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.bound = Some(BoundTarget {
            color: Arc::clone(&color.view),
            depth: depth.map(|d| Arc::clone(&d.view)),
            format: color.format(),
            sample_count: color.desc.sample_count,
            viewport,
        });
    }

    fn set_viewport(&mut self, viewport: Rect) {
        if let Some(bound) = self.bound.as_mut() {
            bound.viewport = viewport;
        }
    }

    fn unbind_target(&mut self) {
        self.bound = None;
    }

    fn resolve(&mut self, msaa: &GpuTexture, dst: &GpuTexture) {
        let _pass = self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("MSAA Resolve Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &msaa.view,
                resolve_target: Some(&dst.view),
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Discard,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    fn blit(&mut self, src: &GpuTexture, src_rect: Rect, dst: BlitTarget<'_, GpuTexture>, dst_rect: Rect, filter: BlitFilter) {
        let (dst_view, dst_format, dst_size) = match dst {
            BlitTarget::Window => match self.window_view() {
                Some(view) => (view, self.config.format, (self.config.width, self.config.height)),
                None => return,
            },
            BlitTarget::Texture(texture) => (Arc::clone(&texture.view), texture.format(), texture.size()),
        };
        // Viewports may not leave the destination.
        if dst_rect.x >= dst_size.0 || dst_rect.y >= dst_size.1 {
            return;
        }
        let dst_rect = Rect {
            width: dst_rect.width.min(dst_size.0 - dst_rect.x),
            height: dst_rect.height.min(dst_size.1 - dst_rect.y),
            ..dst_rect
        };

        let (src_w, src_h) = src.size();
        let lens = match filter {
            BlitFilter::Lens(lens) => {
                // Shrink so the warped edge lands on the viewport edge
                let scale = 1.0 / (1.0 + lens.k1 + lens.k2);
                [lens.k1, lens.k2, 1.0, scale]
            }
            _ => [0.0, 0.0, 0.0, 1.0],
        };
        let uniforms = BlitUniforms {
            src_rect: [
                src_rect.x as f32 / src_w as f32,
                src_rect.y as f32 / src_h as f32,
                src_rect.width as f32 / src_w as f32,
                src_rect.height as f32 / src_h as f32,
            ],
            lens,
        };
        // One buffer per blit: queue writes all land before the encoder runs.
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Blit Uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let sampler = match filter {
            BlitFilter::Nearest => &self.nearest_sampler,
            _ => &self.linear_sampler,
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&src.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        self.ensure_blit_pipeline(dst_format);
        let pipeline = &self.blit_pipelines[&dst_format];
        let encoder = frame_encoder(&mut self.encoder, &self.device);
        let mut pass = load_pass(encoder, &dst_view, None, "Blit Pass");
        set_pass_viewport(&mut pass, dst_rect);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn create_line_mesh(&mut self, vertices: &[LineVertex], indices: &[u16]) -> Result<GpuMesh, GpuError> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(GpuError::Allocation("empty line mesh".into()));
        }
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Line Vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        // Index buffers must be 4-byte aligned
        let mut padded = indices.to_vec();
        if padded.len() % 2 == 1 {
            padded.push(0);
        }
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Line Indices"),
            contents: bytemuck::cast_slice(&padded),
            usage: wgpu::BufferUsages::INDEX,
        });
        Ok(GpuMesh {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: indices.len() as u32,
        })
    }

    fn draw_lines(&mut self, mesh: &GpuMesh, mvp: Mat4) {
        let Some(bound) = self.bound.as_ref() else {
            warn!("draw_lines with no bound target");
            return;
        };
        let key = LinePipelineKey {
            format: bound.format,
            sample_count: bound.sample_count,
            depth: bound.depth.is_some(),
        };
        let (color, depth, viewport) = (Arc::clone(&bound.color), bound.depth.clone(), bound.viewport);

        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Line Uniforms"),
            contents: bytemuck::bytes_of(&LineUniforms {
                mvp: mvp.to_cols_array_2d(),
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Line Bind Group"),
            layout: &self.line_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        self.ensure_line_pipeline(key);
        let pipeline = &self.line_pipelines[&key];
        let encoder = frame_encoder(&mut self.encoder, &self.device);
        let mut pass = load_pass(encoder, &color, depth.as_deref(), "Line Pass");
        set_pass_viewport(&mut pass, viewport);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, mesh.vertices.slice(..));
        pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..mesh.index_count, 0, 0..1);
    }
}

fn frame_encoder<'a>(slot: &'a mut Option<CommandEncoder>, device: &Device) -> &'a mut CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        })
    })
}

/// Pass that keeps existing contents of `color` (and `depth`).
fn load_pass<'e>(
    encoder: &'e mut CommandEncoder,
    color: &TextureView,
    depth: Option<&TextureView>,
    label: &str,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: color,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn set_pass_viewport(pass: &mut wgpu::RenderPass<'_>, viewport: Rect) {
    pass.set_viewport(
        viewport.x as f32,
        viewport.y as f32,
        viewport.width as f32,
        viewport.height as f32,
        0.0,
        1.0,
    );
}

fn to_wgpu_color([r, g, b, a]: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: r as f64,
        g: g as f64,
        b: b as f64,
        a: a as f64,
    }
}
