// =============================================================================
// FRAME RENDERER - winit shell
// =============================================================================
//
// Owns the window and forwards events to the renderer:
// - Resized          -> Renderer::notify_resized
// - RedrawRequested  -> Renderer::render_frame
// - F11              -> toggle borderless fullscreen
// - Escape / close   -> Renderer::shutdown, then exit
//
// While the window has no area the loop stops requesting redraws and blocks
// on platform events until a resize arrives.
//
// =============================================================================

use anyhow::{Context, Result};
use frame_renderer::config::CONFIG_PATH;
use frame_renderer::{Config, FrameStatus, Renderer};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

fn main() -> Result<()> {
    let (config, config_error) = Config::load_or_default(CONFIG_PATH);
    init_logging(&config);

    log::info!("Starting frame renderer");
    match config_error {
        Some(e) => log::warn!("{}. Using defaults.", e),
        None => log::debug!("Config: {:?}", config),
    }
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.exit_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Level from config, `RUST_LOG` overrides it
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

/// Frames per second over one-second windows
struct FpsCounter {
    frame_count: u32,
    last_update: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            frame_count: 0,
            last_update: now,
            last_frame: now,
        }
    }

    /// Count one frame; returns (fps, last frame time in ms) once per second
    fn tick(&mut self) -> Option<(f32, f32)> {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_update).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let fps = self.frame_count as f32 / elapsed;
        self.frame_count = 0;
        self.last_update = now;
        Some((fps, frame_time * 1000.0))
    }
}

struct App {
    config: Config,

    // The renderer owns the surface and must drop before the window
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    is_fullscreen: bool,
    /// Set while the swapchain waits for the window to get an area
    deferred: bool,
    fps: FpsCounter,

    /// First fatal error; returned from `main`
    exit_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            renderer: None,
            window: None,
            is_fullscreen,
            deferred: false,
            fps: FpsCounter::new(),
            exit_error: None,
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>> {
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = event_loop
            .create_window(window_attributes)
            .context("Failed to create window")?;
        Ok(Arc::new(window))
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.render_frame() {
            Ok(FrameStatus::Presented { .. }) => {
                if self.deferred {
                    self.deferred = false;
                    event_loop.set_control_flow(ControlFlow::Poll);
                }
                self.update_fps();
            }
            Ok(FrameStatus::Skipped) => {}
            Ok(FrameStatus::Deferred) => {
                if !self.deferred {
                    log::debug!("Window has no area, waiting for a resize");
                }
                self.deferred = true;
                event_loop.set_control_flow(ControlFlow::Wait);
            }
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("Render error")),
        }
    }

    fn toggle_fullscreen(&mut self) {
        let Some(window) = &self.window else {
            return;
        };

        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }

        if let Some(renderer) = &self.renderer {
            renderer.notify_resized();
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let (Some((fps, frame_ms)), Some(window)) = (self.fps.tick(), &self.window) {
            let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms) [{}]",
                self.config.window.title, fps, frame_ms, mode
            ));
        }
    }

    /// Wait for the GPU, release everything, leave the event loop
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            if let Err(e) = renderer.shutdown() {
                self.fail(event_loop, anyhow::Error::new(e).context("Shutdown failed"));
                return;
            }
        }
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.renderer = None;
        if self.exit_error.is_none() {
            self.exit_error = Some(error);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match self.create_window(event_loop) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e),
        };

        match Renderer::new(&self.config, window.clone()) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                return self.fail(
                    event_loop,
                    anyhow::Error::new(e).context("Failed to initialize renderer"),
                )
            }
        }

        self.window = Some(window);
        event_loop.set_control_flow(ControlFlow::Poll);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = &self.renderer {
                    renderer.notify_resized();
                }
                // A deferred rebuild may be possible now
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => self.render(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() || event.repeat {
                    return;
                }
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        log::info!("ESC pressed, exiting...");
                        self.shutdown(event_loop);
                    }
                    PhysicalKey::Code(KeyCode::F11) => self.toggle_fullscreen(),
                    _ => {}
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.deferred {
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
