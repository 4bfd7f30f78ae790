//! HMD viewer - desktop window mirroring a stereo scene rendered for the headset
//!
//! Renders a floor grid into both eye buffers, submits them to the device,
//! mirrors the result into the window and overlays the debug HUD.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use log::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Window, WindowId};

use hmd_core::renderer::GpuMesh;
use hmd_core::{
    DebugHmd, Eye, EguiText, GpuBackend, GpuError, HmdRenderer, Key, LineVertex, MapStats, MirrorEyes, MirrorMode,
    RenderFlag, RenderFlags, TextRenderer, VrConfig, VrError, WgpuBackend,
};

#[derive(Parser, Debug)]
#[command(name = "hmd_viewer", about = "Stereo HMD viewer with desktop mirror")]
struct Cli {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start with multisampled eye buffers
    #[arg(long)]
    msaa: bool,

    /// Mirror the undistorted eye views instead of the compositor output
    #[arg(long)]
    non_distort_mirror: bool,

    /// Run without a headset attached
    #[arg(long)]
    no_device: bool,
}

const CLEAR_COLOR: [f32; 4] = [0.05, 0.05, 0.07, 1.0];
const GRID_HALF_EXTENT: i32 = 10;

/// Line grid on the floor plane, one meter spacing.
fn floor_grid() -> (Vec<LineVertex>, Vec<u16>) {
    let extent = GRID_HALF_EXTENT as f32;
    let mut vertices = Vec::new();
    for i in -GRID_HALF_EXTENT..=GRID_HALF_EXTENT {
        let t = i as f32;
        let color = if i == 0 { [0.9, 0.4, 0.2, 1.0] } else { [0.35, 0.35, 0.4, 1.0] };
        vertices.push(LineVertex { position: [t, 0.0, -extent], color });
        vertices.push(LineVertex { position: [t, 0.0, extent], color });
        vertices.push(LineVertex { position: [-extent, 0.0, t], color });
        vertices.push(LineVertex { position: [extent, 0.0, t], color });
    }
    let indices = (0..vertices.len() as u16).collect();
    (vertices, indices)
}

struct ViewerApp {
    cli: Cli,
    config: VrConfig,
    window: Option<Arc<Window>>,
    backend: Option<WgpuBackend>,
    hmd: Option<HmdRenderer<WgpuBackend>>,
    grid: Option<GpuMesh>,
    grid_stats: MapStats,
    flags: RenderFlags,
    text: EguiText,
    egui_state: Option<egui_winit::State>,
    start_time: Instant,
}

impl ViewerApp {
    fn new(cli: Cli, config: VrConfig) -> Self {
        Self {
            cli,
            config,
            window: None,
            backend: None,
            hmd: None,
            grid: None,
            grid_stats: MapStats::default(),
            flags: RenderFlags::new(),
            text: EguiText::new(),
            egui_state: None,
            start_time: Instant::now(),
        }
    }

    /// Open the device and build everything VR needs. Leaves `self.hmd`
    /// empty when the headset cannot be used.
    fn init_vr(&mut self, backend: &mut WgpuBackend) {
        let mut hmd = HmdRenderer::new(self.config.clone());
        let device = if self.cli.no_device {
            DebugHmd::absent()
        } else {
            DebugHmd::new()
        };
        if hmd.init_vr(Box::new(device)).is_err() {
            return;
        }

        let (width, height) = backend.window_size();
        let mut buffers = hmd.init_vr_buffers(backend, width, height);
        if let Err(VrError::Gpu(GpuError::UnsupportedSampleCount(samples))) = buffers {
            warn!("{}x MSAA not supported here, using single-sampled eye buffers", samples);
            buffers = hmd
                .set_msaa(backend, false)
                .and_then(|()| hmd.init_vr_buffers(backend, width, height));
        }
        if let Err(err) = buffers {
            error!("Failed to create VR buffers: {}", err);
            return;
        }
        if let Err(err) = hmd.create_debug(backend) {
            warn!("Debug views unavailable: {}", err);
        }
        if let Ok((w, h)) = hmd.get_resolution() {
            info!("HMD {}x{} (debug device: {}, DK2: {})", w, h, hmd.is_debug_hmd(), hmd.is_dk2());
        }
        self.flags.set(RenderFlag::Multisampling, hmd.msaa_enabled());

        let (vertices, indices) = floor_grid();
        match backend.create_line_mesh(&vertices, &indices) {
            Ok(mesh) => {
                let lines = (indices.len() / 2) as u32;
                self.grid_stats = MapStats {
                    vertices: vertices.len() as u32,
                    faces: lines,
                    visible_faces: lines,
                    ..MapStats::default()
                };
                self.grid = Some(mesh);
            }
            Err(err) => warn!("Floor grid unavailable: {}", err),
        }
        self.hmd = Some(hmd);
    }

    fn draw_scene(backend: &mut WgpuBackend, grid: Option<&GpuMesh>, mvp: glam::Mat4) {
        if let Some(grid) = grid {
            backend.draw_lines(grid, mvp);
        }
    }

    fn render_frame(&mut self) {
        let (Some(backend), Some(window)) = (self.backend.as_mut(), self.window.as_ref()) else {
            return;
        };

        match self.hmd.as_mut() {
            Some(hmd) => {
                hmd.update_debug(self.start_time.elapsed().as_secs_f64());
                if let Err(err) = render_vr_frame(hmd, backend, self.grid.as_ref()) {
                    warn!("VR frame failed: {}", err);
                }

                if self.flags.show_stats() {
                    hmd.render_debug(&mut self.text, Some(&self.grid_stats));
                    self.text.set_color(glam::Vec4::new(1.0, 1.0, 0.3, 1.0));
                    for (row, flag) in self.flags.active().enumerate() {
                        self.text.draw_text(flag.label(), 0.55, 0.9 - row as f32 * 0.06, 0.0);
                    }
                } else {
                    hmd.render_debug(&mut self.text, None);
                }
            }
            None => backend.clear_window(CLEAR_COLOR),
        }

        if let Some(state) = self.egui_state.as_mut() {
            let raw_input = state.take_egui_input(window);
            let ctx = state.egui_ctx().clone();
            let text = &mut self.text;
            let mut full_output = ctx.run(raw_input, |ctx| text.paint(ctx));
            let platform_output = std::mem::take(&mut full_output.platform_output);
            state.handle_platform_output(window, platform_output);
            backend.render_egui(&ctx, full_output);
        }

        backend.present();
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, key: Key) {
        if key == Key::Escape {
            info!("Escape pressed, exiting");
            event_loop.exit();
            return;
        }
        if let (Some(hmd), Some(backend)) = (self.hmd.as_mut(), self.backend.as_mut()) {
            if let Err(err) = hmd.on_key_press(backend, key, &mut self.flags) {
                warn!("{:?} failed: {}", key, err);
            }
        } else if key == Key::Tilde {
            self.flags.toggle(RenderFlag::ShowStats);
        }
    }
}

/// One stereo frame: both eyes, submit, then the mirror.
fn render_vr_frame(
    hmd: &mut HmdRenderer<WgpuBackend>,
    backend: &mut WgpuBackend,
    grid: Option<&GpuMesh>,
) -> Result<(), VrError> {
    hmd.on_render_start()?;
    for eye in [Eye::Left, Eye::Right] {
        let mvp = hmd.on_eye_render(backend, eye)?;
        ViewerApp::draw_scene(backend, grid, mvp);
        hmd.render_tracker_frustum(backend, eye);
        hmd.on_eye_render_finish(backend, eye)?;
    }

    // A rejected frame still leaves the last good mirror image.
    if let Err(err) = hmd.submit_frame(backend) {
        warn!("Frame not submitted: {}", err);
    }

    if hmd.is_non_distort_mirror() {
        hmd.on_non_distort_mirror_start(backend)?;
        for eye in [Eye::Left, Eye::Right] {
            let mvp = hmd.bind_non_distort_eye(backend, eye)?;
            ViewerApp::draw_scene(backend, grid, mvp);
            hmd.render_tracker_frustum(backend, eye);
        }
        hmd.on_non_distort_mirror_finish(backend)?;
        hmd.blit_non_distort_mirror(backend, 0)?;
    } else {
        hmd.blit_mirror(backend, MirrorEyes::Both, 0);
    }
    Ok(())
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        info!("Creating viewer window");

        let window_attrs = Window::default_attributes()
            .with_title("HMD Viewer")
            .with_inner_size(PhysicalSize::new(self.config.window_width, self.config.window_height));
        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                error!("Failed to create window: {}", err);
                event_loop.exit();
                return;
            }
        };
        self.window = Some(Arc::clone(&window));

        let mut backend = match pollster::block_on(WgpuBackend::new(Arc::clone(&window))) {
            Ok(backend) => backend,
            Err(err) => {
                error!("Failed to initialize renderer: {}", err);
                event_loop.exit();
                return;
            }
        };
        info!("Renderer initialized");

        self.init_vr(&mut backend);
        self.backend = Some(backend);

        let ctx = egui::Context::default();
        hmd_core::ui::apply_hud_theme(&ctx);
        self.egui_state = Some(egui_winit::State::new(
            ctx,
            egui::ViewportId::ROOT,
            event_loop,
            None,
            None,
            None,
        ));
        self.start_time = Instant::now();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if let (Some(state), Some(window)) = (self.egui_state.as_mut(), self.window.as_ref()) {
            // The HUD is display-only; egui never consumes viewer keys.
            let _ = state.on_window_event(window, &event);
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(backend) = self.backend.as_mut() {
                    backend.resize(size.width, size.height);
                    if size.width > 0 && size.height > 0 {
                        if let Some(hmd) = self.hmd.as_mut() {
                            if let Err(err) = hmd.resize(backend, size.width, size.height) {
                                warn!("Mirror resize failed: {}", err);
                            }
                        }
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let Some(key) = Key::from_event(&event) {
                    self.on_key(event_loop, key);
                }
            }
            WindowEvent::RedrawRequested => self.render_frame(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // GPU resources go before the backend that created them.
        self.grid = None;
        if let Some(mut hmd) = self.hmd.take() {
            hmd.destroy_vr();
        }
        self.backend = None;
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => VrConfig::load(path).unwrap_or_else(|err| {
            warn!("Config {} rejected ({}), using defaults", path.display(), err);
            VrConfig::default()
        }),
        None => VrConfig::default(),
    };
    if cli.msaa {
        config.msaa = true;
    }
    if cli.non_distort_mirror {
        config.mirror = MirrorMode::NonDistorted;
    }
    info!("HMD viewer starting ({:?} mirror, MSAA {})", config.mirror, config.msaa);

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let mut app = ViewerApp::new(cli, config);
    if let Err(err) = event_loop.run_app(&mut app) {
        error!("Event loop failed: {}", err);
    }
}
