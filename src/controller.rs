//! Per-frame orchestration of the canvas.
//!
//! The host calls [`CanvasController::tick`] once per rendered frame. Each
//! tick runs, in order: stream tick, shader tick, surface resize, shader
//! render, host submit, overlay draw, overlay composite. Failures and panics
//! inside a tick are contained there; only [`CanvasController::start`] can
//! fail fatally.

use crate::adapter::{DrawContext, NativeHost, TextureHandle, VersionAdapter};
use crate::config::CanvasConfig;
use crate::error::{CanvasError, MediaDecodeError, UniformError, WorkspaceError};
use crate::media::{MediaAsset, MediaKind, StandardDecoder, TextureStream};
use crate::overlay::{EditorOverlay, InputEvent, OverlayEdit, OverlayView, PointerButton};
use crate::shader::{default_preset, CompileOutcome, FrameInputs, ShaderPipeline, UniformValue};
use crate::surface::CanvasSurface;
use crate::utils::FpsCounter;
use crate::workspace::ShaderWorkspace;
use chrono::{Datelike, Timelike};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Ready,
    Rendering,
    TearingDown,
    Terminated,
}

impl ControllerState {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerState::Uninitialized => "uninitialized",
            ControllerState::Ready => "ready",
            ControllerState::Rendering => "rendering",
            ControllerState::TearingDown => "tearing down",
            ControllerState::Terminated => "terminated",
        }
    }
}

/// What the host hands over each frame.
#[derive(Debug, Clone, Default)]
pub struct HostFrame {
    pub width: u32,
    pub height: u32,
    pub delta: Duration,
    pub events: Vec<InputEvent>,
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub state: ControllerState,
    /// The shader stage drew and was submitted.
    pub rendered: bool,
    pub compile: CompileOutcome,
    pub surface_size: Option<(u32, u32)>,
    pub stream_index: usize,
    pub overlay_meshes: usize,
    /// The failure that turned this tick into a no-op frame.
    pub error: Option<String>,
}

impl FrameReport {
    fn new(state: ControllerState) -> Self {
        Self {
            state,
            rendered: false,
            compile: CompileOutcome::Idle,
            surface_size: None,
            stream_index: 0,
            overlay_meshes: 0,
            error: None,
        }
    }
}

/// Pointer state behind `iMouse`, in canvas pixels with a bottom-left origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MouseState {
    position: [f32; 2],
    click: [f32; 2],
    down: bool,
}

impl MouseState {
    fn apply(&mut self, event: &InputEvent, frame: (u32, u32), canvas: (u32, u32)) {
        let to_canvas = |x: f32, y: f32| {
            let sx = canvas.0 as f32 / frame.0.max(1) as f32;
            let sy = canvas.1 as f32 / frame.1.max(1) as f32;
            [x * sx, (frame.1 as f32 - y) * sy]
        };
        match *event {
            InputEvent::PointerMoved { x, y } if self.down => self.position = to_canvas(x, y),
            InputEvent::PointerButton {
                x,
                y,
                button: PointerButton::Primary,
                pressed,
            } => {
                let p = to_canvas(x, y);
                if pressed {
                    self.position = p;
                    self.click = p;
                }
                self.down = pressed;
            }
            InputEvent::PointerLeft => self.down = false,
            _ => {}
        }
    }

    /// Click coordinates are negated while the button is up.
    fn uniform(&self) -> [f32; 4] {
        let sign = if self.down { 1.0 } else { -1.0 };
        [self.position[0], self.position[1], sign * self.click[0], sign * self.click[1]]
    }
}

fn local_date() -> [f32; 4] {
    let now = chrono::Local::now();
    let seconds = now.num_seconds_from_midnight() as f32 + now.nanosecond() as f32 / 1e9;
    [now.year() as f32, now.month0() as f32, now.day() as f32, seconds]
}

pub struct CanvasController {
    state: ControllerState,
    adapter: VersionAdapter,
    surface: CanvasSurface,
    pipeline: ShaderPipeline,
    stream: TextureStream,
    overlay: EditorOverlay,
    workspace: Option<ShaderWorkspace>,
    files: Vec<PathBuf>,
    shader_path: Option<PathBuf>,
    auto_compile: bool,
    diagnostics: bool,
    clock: Duration,
    frame: i32,
    mouse: MouseState,
    overlay_wants_pointer: bool,
    fps: FpsCounter,
}

impl CanvasController {
    /// Selects the adapter for `version`, allocates the surface and builds the
    /// placeholder program. Any failure here is fatal.
    pub fn start(version: &str, host: NativeHost, config: CanvasConfig) -> Result<Self, CanvasError> {
        let config = config.normalized();
        debug!("Canvas controller {}", ControllerState::Uninitialized.name());
        let mut adapter = VersionAdapter::select(version, host)?;

        let mut surface = CanvasSurface::new(config.render_scale, config.alpha);
        let (width, height) = adapter.frame_size();
        surface.resize(&mut adapter, width, height)?;

        let mut pipeline = match ShaderPipeline::new(&mut adapter) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                surface.release(&mut adapter);
                return Err(err);
            }
        };

        let mut shader_path = None;
        let source = match &config.shader {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(text) => {
                    shader_path = Some(path.clone());
                    text
                }
                Err(e) => {
                    warn!("Failed to read shader {:?}: {}, using the default preset", path, e);
                    default_preset().source.to_string()
                }
            },
            None => default_preset().source.to_string(),
        };
        pipeline.set_source(source);

        let decoder = Arc::new(StandardDecoder::new(config.decode.clone()));
        let mut stream = TextureStream::new(decoder, config.decode.background_video);
        stream.set_looping(config.looping);
        stream.set_playing(config.playing);

        let workspace_root = config
            .workspace
            .clone()
            .or_else(|| config.shader.as_ref().and_then(|p| p.parent()).map(Path::to_path_buf))
            .filter(|root| !root.as_os_str().is_empty());
        let workspace = workspace_root.and_then(|root| match ShaderWorkspace::open(&root) {
            Ok(ws) => Some(ws),
            Err(e) => {
                warn!("Shader workspace {:?} unavailable: {}", root, e);
                None
            }
        });

        let mut controller = Self {
            state: ControllerState::Ready,
            adapter,
            surface,
            pipeline,
            stream,
            overlay: EditorOverlay::new(config.overlay_visible),
            workspace,
            files: Vec::new(),
            shader_path,
            auto_compile: config.auto_compile,
            diagnostics: config.diagnostics,
            clock: Duration::ZERO,
            frame: 0,
            mouse: MouseState::default(),
            overlay_wants_pointer: false,
            fps: FpsCounter::new(),
        };
        controller.refresh_files();

        if let Some(media) = &config.media {
            if let Err(e) = controller.load_media_file(&media.path, media.kind) {
                warn!("Failed to load media {:?}: {}", media.path, e);
            }
        }

        info!(
            "Canvas ready on host release {} at {:?}",
            controller.adapter.release(),
            controller.surface.size()
        );
        Ok(controller)
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Runs one frame. Never fails: errors and panics turn the tick into a
    /// no-op frame and are reported in the returned [`FrameReport`].
    pub fn tick(&mut self, frame: HostFrame) -> FrameReport {
        if matches!(self.state, ControllerState::TearingDown | ControllerState::Terminated) {
            let mut report = FrameReport::new(self.state);
            report.error = Some(CanvasError::InvalidState(self.state.name()).to_string());
            return report;
        }
        self.state = ControllerState::Rendering;

        let mut report = FrameReport::new(self.state);
        let result = catch_unwind(AssertUnwindSafe(|| self.run_tick(&frame, &mut report)));
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };
        if let Some(message) = failure {
            error!("Canvas tick failed: {}", message);
            report.rendered = false;
            report.error = Some(message);
        }

        report.surface_size = self.surface.size();
        report.stream_index = self.stream.index();
        report
    }

    fn run_tick(&mut self, frame: &HostFrame, report: &mut FrameReport) -> Result<(), CanvasError> {
        let delta = frame.delta;
        self.stream.tick(delta);

        report.compile = self.pipeline.tick(&mut self.adapter);
        if report.compile == CompileOutcome::Compiled {
            self.clock = Duration::ZERO;
            self.frame = 0;
        }

        let reallocated = self.surface.resize(&mut self.adapter, frame.width, frame.height)?;
        let stream_frame = self.stream.current_frame(&mut self.adapter)?;

        if !self.overlay_wants_pointer {
            let canvas = self.surface.size().unwrap_or((1, 1));
            for event in &frame.events {
                self.mouse.apply(event, (frame.width, frame.height), canvas);
            }
        }

        let mut ctx = self.adapter.acquire_draw_context();
        if reallocated {
            self.surface.clear(&mut ctx, CLEAR_COLOR);
        }
        // The host frame is ended even when drawing panics.
        let drawn = catch_unwind(AssertUnwindSafe(|| self.draw(&mut ctx, frame, stream_frame, report)));
        if !matches!(drawn, Ok(Ok(()))) {
            ctx.discard();
        }
        self.adapter.finish_frame(ctx);
        match drawn {
            Ok(result) => result?,
            Err(panic) => resume_unwind(panic),
        }

        self.clock += delta;
        self.frame = self.frame.wrapping_add(1);
        if let Some(fps) = self.fps.update(delta) {
            if self.diagnostics {
                debug!("{:.1} fps, canvas {:?}, stream frame {}", fps, self.surface.size(), self.stream.index());
            }
        }
        Ok(())
    }

    fn draw(
        &mut self,
        ctx: &mut DrawContext,
        frame: &HostFrame,
        stream_frame: TextureHandle,
        report: &mut FrameReport,
    ) -> Result<(), CanvasError> {
        let (width, height) = self.surface.size().unwrap_or((1, 1));
        let delta = frame.delta.as_secs_f32();
        let inputs = FrameInputs {
            resolution: [width as f32, height as f32],
            time: self.clock.as_secs_f32(),
            time_delta: delta,
            frame: self.frame,
            frame_rate: self
                .fps
                .last()
                .unwrap_or(if delta > 0.0 { 1.0 / delta } else { 0.0 }),
            mouse: self.mouse.uniform(),
            date: local_date(),
            stream_time: self.stream.position().as_secs_f32(),
        };

        self.pipeline.render(ctx, &self.surface, stream_frame, &inputs)?;
        self.adapter.submit_draw(&self.surface, ctx)?;
        report.rendered = true;

        let uniforms = self.pipeline.uniforms();
        let status = self.stream.status();
        let view = OverlayView {
            source: self.pipeline.source(),
            diagnostic: self.pipeline.diagnostic(),
            has_program: self.pipeline.has_program(),
            uniforms: &uniforms,
            stream: &status,
            auto_compile: self.auto_compile,
            files: &self.files,
            current_file: self.shader_path.as_deref(),
            fps: self.fps.last(),
        };
        let overlay = self.overlay.draw(&mut self.adapter, &frame.events, delta, &view)?;
        self.adapter.composite_overlay(&overlay.commands, ctx);
        report.overlay_meshes = overlay.commands.meshes.len();
        self.overlay_wants_pointer = overlay.wants_pointer;

        for edit in overlay.edits {
            self.apply_edit(edit);
        }
        Ok(())
    }

    /// Applies one overlay action. Effects show on the next tick.
    pub fn apply_edit(&mut self, edit: OverlayEdit) {
        match edit {
            OverlayEdit::SetSource(text) => self.pipeline.set_source(text),
            OverlayEdit::SetUniform(name, value) => {
                if let Err(e) = self.pipeline.set_uniform(&name, value) {
                    warn!("{}", e);
                }
            }
            OverlayEdit::Seek(index) => self.stream.seek(index),
            OverlayEdit::SetPlaying(playing) => self.stream.set_playing(playing),
            OverlayEdit::SetLooping(looping) => self.stream.set_looping(looping),
            OverlayEdit::Restart => self.stream.restart(),
            OverlayEdit::CancelLoad => self.stream.cancel_load(),
            OverlayEdit::SetAutoCompile(auto) => self.auto_compile = auto,
            OverlayEdit::Save => {
                if let Err(e) = self.save_source() {
                    error!("Failed to save shader: {}", e);
                }
            }
            OverlayEdit::Reload => {
                if let Err(e) = self.reload_source() {
                    error!("Failed to reload shader: {}", e);
                }
            }
            OverlayEdit::OpenFile(path) => {
                if let Err(e) = self.open_file(&path) {
                    error!("Failed to open {:?}: {}", path, e);
                }
            }
        }
    }

    /// Queues new source for compilation on the next tick.
    pub fn set_source(&mut self, text: impl Into<String>) {
        self.pipeline.set_source(text);
    }

    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> Result<(), UniformError> {
        self.pipeline.set_uniform(name, value)
    }

    /// Re-reads the current shader file.
    pub fn reload_source(&mut self) -> Result<(), WorkspaceError> {
        let path = self.shader_path.as_ref().ok_or(WorkspaceError::NoShaderFile)?;
        let text = std::fs::read_to_string(path)?;
        info!("Reloaded shader {:?}", path);
        self.pipeline.set_source(text);
        Ok(())
    }

    /// Writes the editor source to the current shader file, or to a new file
    /// in the workspace when none is open.
    pub fn save_source(&mut self) -> Result<PathBuf, WorkspaceError> {
        let text = self.pipeline.source().to_string();
        let path = match (&self.shader_path, &self.workspace) {
            (Some(path), Some(ws)) if path.starts_with(ws.root()) => ws.write(path, &text)?,
            (Some(path), _) => {
                std::fs::write(path, &text)?;
                path.clone()
            }
            (None, Some(ws)) => ws.write("canvas.frag", &text)?,
            (None, None) => return Err(WorkspaceError::NoShaderFile),
        };
        self.shader_path = Some(path.clone());
        self.refresh_files();
        Ok(path)
    }

    /// Opens a workspace file and queues it for compilation.
    pub fn open_file(&mut self, path: &Path) -> Result<(), WorkspaceError> {
        let ws = self.workspace.as_ref().ok_or(WorkspaceError::NoShaderFile)?;
        let resolved = ws.resolve(path)?;
        let text = ws.read(path)?;
        self.pipeline.set_source(text);
        self.shader_path = Some(resolved);
        Ok(())
    }

    fn refresh_files(&mut self) {
        self.files = match &self.workspace {
            Some(ws) => ws.list().unwrap_or_else(|e| {
                warn!("Failed to list workspace: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
    }

    pub fn load_media(&mut self, asset: MediaAsset) {
        info!("Loading {} media", asset.kind().label());
        self.stream.load(asset);
    }

    pub fn load_media_file(&mut self, path: impl AsRef<Path>, kind: Option<MediaKind>) -> Result<(), MediaDecodeError> {
        let asset = MediaAsset::from_path(path, kind)?;
        self.load_media(asset);
        Ok(())
    }

    pub fn set_overlay_visible(&mut self, visible: bool) {
        self.overlay.set_visible(visible);
        if !visible {
            self.overlay_wants_pointer = false;
        }
    }

    pub fn toggle_overlay(&mut self) {
        let visible = !self.overlay.is_visible();
        self.set_overlay_visible(visible);
    }

    /// Sends subsequent text input to the overlay's source editor.
    pub fn focus_editor(&mut self) {
        self.overlay.focus_editor();
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay.is_visible()
    }

    pub fn shader_path(&self) -> Option<&Path> {
        self.shader_path.as_deref()
    }

    pub fn pipeline(&self) -> &ShaderPipeline {
        &self.pipeline
    }

    pub fn stream(&self) -> &TextureStream {
        &self.stream
    }

    pub fn surface(&self) -> &CanvasSurface {
        &self.surface
    }

    pub fn adapter(&self) -> &VersionAdapter {
        &self.adapter
    }

    /// Shader clock, reset by every successful compile.
    pub fn shader_time(&self) -> Duration {
        self.clock
    }

    pub fn frame_count(&self) -> i32 {
        self.frame
    }

    /// Releases every host resource. Further ticks are no-ops.
    pub fn shutdown(&mut self) {
        if matches!(self.state, ControllerState::TearingDown | ControllerState::Terminated) {
            return;
        }
        self.state = ControllerState::TearingDown;
        self.stream.release(&mut self.adapter);
        self.overlay.release(&mut self.adapter);
        self.pipeline.release(&mut self.adapter);
        self.surface.release(&mut self.adapter);
        self.state = ControllerState::Terminated;
        info!("Canvas terminated");
    }
}

impl Drop for CanvasController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}
