//! Render-target host backed by wgpu, standing in for host release 1.21.4.

use crate::adapter::native::{GuiBatch, NativeId, RenderTargetApi};
use anyhow::{anyhow, Result};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;
use winit::window::Window;

/// Vertex stage shared by canvas programs and the composite blit.
const QUAD_VERTEX_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coords: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.tex_coords = in.tex_coords;
    return out;
}
"#;

const BLIT_FRAGMENT_SHADER: &str = r#"
struct Blit {
    alpha: f32,
    pad0: f32,
    pad1: f32,
    pad2: f32,
}

@group(0) @binding(0) var t_texture: texture_2d<f32>;
@group(0) @binding(1) var s_sampler: sampler;
@group(0) @binding(2) var<uniform> blit: Blit;

@fragment
fn fs_main(@location(0) tex_coords: vec2<f32>) -> @location(0) vec4<f32> {
    let c = textureSample(t_texture, s_sampler, tex_coords);
    return vec4<f32>(c.rgb * c.a * blit.alpha, c.a * blit.alpha);
}
"#;

const GUI_SHADER: &str = r#"
struct Screen {
    size: vec2<f32>,
    pad: vec2<f32>,
}

@group(0) @binding(0) var<uniform> screen: Screen;
@group(1) @binding(0) var gui_texture: texture_2d<f32>;
@group(1) @binding(1) var gui_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(@location(0) pos: vec2<f32>, @location(1) uv: vec2<f32>, @location(2) color: vec4<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(2.0 * pos.x / screen.size.x - 1.0, 1.0 - 2.0 * pos.y / screen.size.y, 0.0, 1.0);
    out.uv = uv;
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color * textureSample(gui_texture, gui_sampler, in.uv);
}
"#;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.08,
    g: 0.08,
    b: 0.1,
    a: 1.0,
};

/// Vertex for rendering a full-screen quad.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    tex_coords: [f32; 2],
}

impl QuadVertex {
    const VERTICES: &'static [QuadVertex] = &[
        QuadVertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
        QuadVertex { position: [1.0, -1.0], tex_coords: [1.0, 1.0] },
        QuadVertex { position: [1.0, 1.0], tex_coords: [1.0, 0.0] },
        QuadVertex { position: [-1.0, 1.0], tex_coords: [0.0, 0.0] },
    ];

    const INDICES: &'static [u16] = &[0, 1, 2, 2, 3, 0];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

fn gui_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Unorm8x4];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<crate::adapter::GuiVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

enum Resource {
    Texture {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
        width: u32,
        height: u32,
    },
    Pipeline {
        pipeline: wgpu::RenderPipeline,
        uniforms: wgpu::Buffer,
        uniform_size: u64,
    },
}

struct Frame {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
    /// The surface has been cleared this frame.
    cleared: bool,
}

/// A winit window plus the wgpu state behind [`RenderTargetApi`].
pub struct WgpuHost {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    vertex_module: wgpu::ShaderModule,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    canvas_uniform_layout: wgpu::BindGroupLayout,
    channel_layout: wgpu::BindGroupLayout,
    canvas_pipeline_layout: wgpu::PipelineLayout,
    blit_layout: wgpu::BindGroupLayout,
    blit_pipeline: wgpu::RenderPipeline,
    blit_uniforms: wgpu::Buffer,
    gui_screen_layout: wgpu::BindGroupLayout,
    gui_texture_layout: wgpu::BindGroupLayout,
    gui_pipeline: wgpu::RenderPipeline,
    gui_screen: wgpu::Buffer,
    resources: HashMap<NativeId, Resource>,
    next_id: NativeId,
    frame: Option<Frame>,
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_view(resources: &HashMap<NativeId, Resource>, id: NativeId) -> Option<&wgpu::TextureView> {
    match resources.get(&id) {
        Some(Resource::Texture { view, .. }) => Some(view),
        _ => None,
    }
}

fn primitive_state() -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleList,
        strip_index_format: None,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: None,
        polygon_mode: wgpu::PolygonMode::Fill,
        unclipped_depth: false,
        conservative: false,
    }
}

impl WgpuHost {
    /// Creates the device and surface for `window`.
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| anyhow!("Failed to find GPU adapter: {:?}", e))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Canvas Preview Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        // Canvas and overlay colors are already in display space.
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow!("Surface reports no formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Quad Vertex Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(QUAD_VERTEX_SHADER)),
        });

        let canvas_uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Canvas Uniform Layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::FRAGMENT)],
        });
        let channel_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..4)
            .flat_map(|channel| [texture_entry(channel * 2), sampler_entry(channel * 2 + 1)])
            .collect();
        let channel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Canvas Channel Layout"),
            entries: &channel_entries,
        });
        let canvas_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Canvas Pipeline Layout"),
            bind_group_layouts: &[&canvas_uniform_layout, &channel_layout],
            immediate_size: 0,
        });

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Layout"),
            entries: &[
                texture_entry(0),
                sampler_entry(1),
                uniform_entry(2, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Fragment Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BLIT_FRAGMENT_SHADER)),
        });
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&blit_layout],
            immediate_size: 0,
        });
        let blit_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Blit Pipeline"),
            layout: Some(&blit_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("vs_main"),
                buffers: &[QuadVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &blit_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: primitive_state(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        let blit_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Blit Uniforms"),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let gui_screen_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GUI Screen Layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX)],
        });
        let gui_texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GUI Texture Layout"),
            entries: &[texture_entry(0), sampler_entry(1)],
        });
        let gui_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("GUI Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(GUI_SHADER)),
        });
        let gui_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GUI Pipeline Layout"),
            bind_group_layouts: &[&gui_screen_layout, &gui_texture_layout],
            immediate_size: 0,
        });
        let gui_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("GUI Pipeline"),
            layout: Some(&gui_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &gui_module,
                entry_point: Some("vs_main"),
                buffers: &[gui_vertex_layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &gui_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: primitive_state(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        let gui_screen = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GUI Screen Uniforms"),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Index Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Canvas Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        info!("wgpu host ready ({:?}, {}x{})", surface_format, config.width, config.height);
        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            vertex_module,
            vertex_buffer,
            index_buffer,
            sampler,
            canvas_uniform_layout,
            channel_layout,
            canvas_pipeline_layout,
            blit_layout,
            blit_pipeline,
            blit_uniforms,
            gui_screen_layout,
            gui_texture_layout,
            gui_pipeline,
            gui_screen,
            resources: HashMap::new(),
            next_id: 0,
            frame: None,
        })
    }

    fn insert(&mut self, resource: Resource) -> NativeId {
        self.next_id += 1;
        self.resources.insert(self.next_id, resource);
        self.next_id
    }

    fn new_texture(&self, label: &str, width: u32, height: u32, usage: wgpu::TextureUsages) -> Resource {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Resource::Texture {
            texture,
            view,
            width,
            height,
        }
    }

    fn upload(&self, texture: &wgpu::Texture, origin: [u32; 2], width: u32, height: u32, rgba: &[u8]) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: origin[0],
                    y: origin[1],
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn begin_pass<'a>(
        encoder: &'a mut wgpu::CommandEncoder,
        label: &str,
        view: &'a wgpu::TextureView,
        load: wgpu::LoadOp<wgpu::Color>,
    ) -> wgpu::RenderPass<'a> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        })
    }

    /// Reconfigures the swapchain when the window size changed.
    fn sync_size(&mut self) {
        let size = self.window.inner_size();
        if size.width > 0
            && size.height > 0
            && (size.width != self.config.width || size.height != self.config.height)
        {
            self.config.width = size.width;
            self.config.height = size.height;
            self.surface.configure(&self.device, &self.config);
            debug!("Surface resized to {}x{}", size.width, size.height);
        }
    }

    /// Clears the window once per frame before the first composite.
    fn surface_load_op(frame: &mut Frame) -> wgpu::LoadOp<wgpu::Color> {
        if frame.cleared {
            wgpu::LoadOp::Load
        } else {
            frame.cleared = true;
            wgpu::LoadOp::Clear(BACKGROUND)
        }
    }
}

impl RenderTargetApi for WgpuHost {
    fn window_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width.max(1), size.height.max(1))
    }

    fn create_texture(&mut self, label: &str, width: u32, height: u32, rgba: &[u8]) -> Result<NativeId, String> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(format!("{}x{} exceeds the {} texel limit", width, height, limit));
        }
        let resource = self.new_texture(
            label,
            width,
            height,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        if let Resource::Texture { texture, .. } = &resource {
            self.upload(texture, [0, 0], width, height, rgba);
        }
        Ok(self.insert(resource))
    }

    fn write_texture(&mut self, id: NativeId, origin: [u32; 2], width: u32, height: u32, rgba: &[u8]) {
        match self.resources.get(&id) {
            Some(Resource::Texture {
                texture,
                width: tex_width,
                height: tex_height,
                ..
            }) => {
                let fits = |start: u32, len: u32, limit: u32| start.checked_add(len).is_some_and(|end| end <= limit);
                if !fits(origin[0], width, *tex_width) || !fits(origin[1], height, *tex_height) {
                    warn!("write_texture region out of bounds for texture {}", id);
                    return;
                }
                self.upload(texture, origin, width, height, rgba);
            }
            _ => warn!("write_texture on unknown texture {}", id),
        }
    }

    fn create_render_target(&mut self, label: &str, width: u32, height: u32) -> Result<NativeId, String> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(format!("{}x{} exceeds the {} texel limit", width, height, limit));
        }
        let resource = self.new_texture(
            label,
            width,
            height,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        Ok(self.insert(resource))
    }

    fn create_pipeline(&mut self, label: &str, fragment_wgsl: &str, uniform_size: u64) -> Result<NativeId, String> {
        let fragment_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(fragment_wgsl.to_string())),
        });
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&self.canvas_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.vertex_module,
                entry_point: Some("vs_main"),
                buffers: &[QuadVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: primitive_state(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        // Uniform bindings are sized in 16-byte rows.
        let uniform_size = uniform_size.max(16).div_ceil(16) * 16;
        let uniforms = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: uniform_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        debug!("Created pipeline {} with {} uniform bytes", label, uniform_size);
        Ok(self.insert(Resource::Pipeline {
            pipeline,
            uniforms,
            uniform_size,
        }))
    }

    fn destroy(&mut self, resource: NativeId) {
        // wgpu keeps the backing memory alive until in-flight commands finish.
        if self.resources.remove(&resource).is_none() {
            debug!("destroy on unknown resource {}", resource);
        }
    }

    fn begin_frame(&mut self) {
        self.sync_size();
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(e) => {
                warn!("Skipping frame: {}", e);
                self.surface.configure(&self.device, &self.config);
                self.frame = None;
                return;
            }
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Canvas Frame Encoder"),
        });
        self.frame = Some(Frame {
            output,
            view,
            encoder,
            cleared: false,
        });
    }

    fn clear_target(&mut self, target: NativeId, color: [f32; 4]) {
        let Some(Resource::Texture { view, .. }) = self.resources.get(&target) else {
            return;
        };
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        let clear = wgpu::Color {
            r: f64::from(color[0]),
            g: f64::from(color[1]),
            b: f64::from(color[2]),
            a: f64::from(color[3]),
        };
        Self::begin_pass(&mut frame.encoder, "Canvas Clear Pass", view, wgpu::LoadOp::Clear(clear));
    }

    fn render_to_target(&mut self, target: NativeId, program: NativeId, uniforms: &[u8], channels: &[NativeId; 4]) {
        let Some(Resource::Pipeline {
            pipeline,
            uniforms: uniform_buffer,
            uniform_size,
        }) = self.resources.get(&program)
        else {
            warn!("render_to_target with unknown pipeline {}", program);
            return;
        };
        let Some(target_view) = texture_view(&self.resources, target) else {
            warn!("render_to_target with unknown target {}", target);
            return;
        };
        let mut views = Vec::with_capacity(4);
        for channel in channels {
            match texture_view(&self.resources, *channel) {
                Some(view) => views.push(view),
                None => {
                    warn!("render_to_target with unknown channel texture {}", channel);
                    return;
                }
            }
        }

        let len = (uniforms.len() as u64).min(*uniform_size) as usize & !3;
        if len > 0 {
            self.queue.write_buffer(uniform_buffer, 0, &uniforms[..len]);
        }
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Canvas Uniform Bind Group"),
            layout: &self.canvas_uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let channel_entries: Vec<wgpu::BindGroupEntry<'_>> = views
            .iter()
            .enumerate()
            .flat_map(|(i, view)| {
                [
                    wgpu::BindGroupEntry {
                        binding: i as u32 * 2,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: i as u32 * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ]
            })
            .collect();
        let channel_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Canvas Channel Bind Group"),
            layout: &self.channel_layout,
            entries: &channel_entries,
        });

        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        let mut pass = Self::begin_pass(&mut frame.encoder, "Canvas Pass", target_view, wgpu::LoadOp::Load);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &uniform_group, &[]);
        pass.set_bind_group(1, &channel_group, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..6, 0, 0..1);
    }

    fn composite_target(&mut self, target: NativeId, alpha: f32) {
        let Some(view) = texture_view(&self.resources, target) else {
            return;
        };
        self.queue
            .write_buffer(&self.blit_uniforms, 0, bytemuck::cast_slice(&[alpha, 0.0, 0.0, 0.0]));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.blit_uniforms.as_entire_binding(),
                },
            ],
        });

        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        let load = Self::surface_load_op(frame);
        let mut pass = Self::begin_pass(&mut frame.encoder, "Composite Pass", &frame.view, load);
        pass.set_pipeline(&self.blit_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..6, 0, 0..1);
    }

    fn submit_gui(&mut self, batches: &[GuiBatch<'_>]) {
        let (width, height) = (self.config.width, self.config.height);
        self.queue.write_buffer(
            &self.gui_screen,
            0,
            bytemuck::cast_slice(&[width as f32, height as f32, 0.0, 0.0]),
        );
        let screen_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GUI Screen Bind Group"),
            layout: &self.gui_screen_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.gui_screen.as_entire_binding(),
            }],
        });

        let mut prepared = Vec::with_capacity(batches.len());
        for batch in batches {
            let Some(view) = texture_view(&self.resources, batch.texture) else {
                continue;
            };
            let [x, y, w, h] = batch.scissor;
            if w == 0 || h == 0 || x >= width || y >= height {
                continue;
            }
            let texture_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("GUI Texture Bind Group"),
                layout: &self.gui_texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("GUI Vertices"),
                contents: bytemuck::cast_slice(batch.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let indices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("GUI Indices"),
                contents: bytemuck::cast_slice(batch.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            let scissor = [x, y, w.min(width - x), h.min(height - y)];
            prepared.push((texture_group, vertices, indices, batch.indices.len() as u32, scissor));
        }

        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        let load = Self::surface_load_op(frame);
        let mut pass = Self::begin_pass(&mut frame.encoder, "GUI Pass", &frame.view, load);
        pass.set_pipeline(&self.gui_pipeline);
        pass.set_bind_group(0, &screen_group, &[]);
        for (texture_group, vertices, indices, count, [x, y, w, h]) in &prepared {
            pass.set_scissor_rect(*x, *y, *w, *h);
            pass.set_bind_group(1, texture_group, &[]);
            pass.set_vertex_buffer(0, vertices.slice(..));
            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..*count, 0, 0..1);
        }
    }

    fn end_frame(&mut self) {
        let Some(mut frame) = self.frame.take() else {
            return;
        };
        if !frame.cleared {
            Self::begin_pass(&mut frame.encoder, "Background Pass", &frame.view, wgpu::LoadOp::Clear(BACKGROUND));
        }
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        self.window.pre_present_notify();
        frame.output.present();
    }
}
