//! canvas-glsl: desktop preview of the embeddable GLSL canvas.

use anyhow::Result;
use canvas_glsl::adapter::NativeHost;
use canvas_glsl::config::{CanvasConfig, MediaConfig};
use canvas_glsl::controller::{CanvasController, HostFrame};
use canvas_glsl::host::{InputCollector, WgpuHost};
use canvas_glsl::overlay::Key;
use canvas_glsl::watch::ShaderWatcher;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

/// Live-editable GLSL canvas.
#[derive(Parser, Debug)]
#[command(name = "canvas-glsl")]
#[command(about = "Edit and preview GLSL fragment shaders on a live canvas")]
struct Args {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// GLSL fragment shader to open (overrides the config)
    #[arg(short, long)]
    shader: Option<PathBuf>,

    /// Image, GIF or video bound to iChannel0 (overrides the config)
    #[arg(short, long)]
    media: Option<PathBuf>,

    /// Host release the canvas adapts to
    #[arg(long, default_value = "1.21.4")]
    host_version: String,

    /// Window width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Window height
    #[arg(long, default_value = "720")]
    height: u32,

    /// Reload the shader when its file changes on disk
    #[arg(short, long)]
    watch: bool,

    /// Start with the editor overlay hidden (F1 toggles it)
    #[arg(long)]
    hide_overlay: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn canvas_config(&self) -> Result<CanvasConfig> {
        let mut config = match &self.config {
            Some(path) => CanvasConfig::load(path)?,
            None => CanvasConfig::default(),
        };
        if let Some(shader) = &self.shader {
            config.shader = Some(shader.clone());
        }
        if let Some(media) = &self.media {
            config.media = Some(MediaConfig {
                path: media.clone(),
                kind: None,
            });
        }
        if self.hide_overlay {
            config.overlay_visible = false;
        }
        Ok(config)
    }
}

/// Application state for the event loop.
struct CanvasApp {
    args: Args,
    config: CanvasConfig,
    window: Option<Arc<Window>>,
    controller: Option<CanvasController>,
    watcher: Option<ShaderWatcher>,
    input: InputCollector,
    last_frame_time: Instant,
}

impl CanvasApp {
    fn new(args: Args, config: CanvasConfig) -> Self {
        Self {
            args,
            config,
            window: None,
            controller: None,
            watcher: None,
            input: InputCollector::new(),
            last_frame_time: Instant::now(),
        }
    }

    fn initialize(&mut self, window: Arc<Window>) -> Result<()> {
        let host = WgpuHost::new(window)?;
        let controller = CanvasController::start(
            &self.args.host_version,
            NativeHost::RenderTargets(Box::new(host)),
            self.config.clone(),
        )?;

        if self.args.watch {
            match controller.shader_path() {
                Some(path) => self.watcher = ShaderWatcher::new(path),
                None => warn!("--watch has no effect without a shader file"),
            }
        }
        self.controller = Some(controller);
        Ok(())
    }

    fn render(&mut self) {
        let (Some(window), Some(controller)) = (&self.window, &mut self.controller) else {
            return;
        };

        if let Some(watcher) = &mut self.watcher {
            if let Some(text) = watcher.poll() {
                controller.set_source(text);
            }
        }

        let now = Instant::now();
        let delta = now.duration_since(self.last_frame_time);
        self.last_frame_time = now;

        let size = window.inner_size();
        let report = controller.tick(HostFrame {
            width: size.width,
            height: size.height,
            delta,
            events: self.input.drain(),
        });
        if let Some(e) = report.error {
            warn!("Frame skipped: {}", e);
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut controller) = self.controller.take() {
            controller.shutdown();
        }
    }
}

impl ApplicationHandler for CanvasApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title("canvas-glsl")
            .with_inner_size(PhysicalSize::new(self.args.width, self.args.height));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        self.window = Some(window.clone());

        if let Err(e) = self.initialize(window) {
            error!("Initialization error: {:#}", e);
            event_loop.exit();
            return;
        }
        info!("Canvas ready (host {})", self.args.host_version);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if let Some(Key::F1) = self.input.handle(&event) {
            if let Some(controller) = &mut self.controller {
                controller.toggle_overlay();
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                self.render();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.canvas_config()?;
    info!("Starting canvas-glsl...");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = CanvasApp::new(args, config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
