// =============================================================================
// WINDOW - surface provider and loop driver
// =============================================================================
//
// Owns the native window, produces the Vulkan surface for it, and drives the
// blocking event loop: poll input, then run one iteration, until the window
// is closed.

use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

use crate::backend::SurfaceSource;
use crate::config::WindowConfig;
use crate::error::{Error, Result};
use crate::logging::LogSink;
use crate::{sink_debug, sink_error, sink_info};

/// Native window the renderer presents into
pub struct SurfaceWindow {
    window: Arc<Window>,
    title: String,
}

impl SurfaceWindow {
    fn create(event_loop: &ActiveEventLoop, config: &WindowConfig, log: &LogSink) -> Result<Self> {
        sink_debug!(
            log,
            "Creating Window(title=\"{}\", width={}, height={})",
            config.title, config.width, config.height
        );

        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| Error::Window(format!("Failed to create window: {e}")))?;

        Ok(Self {
            window: Arc::new(window),
            title: config.title.clone(),
        })
    }

    pub fn width(&self) -> u32 {
        self.window.inner_size().width
    }

    pub fn height(&self) -> u32 {
        self.window.inner_size().height
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Show a status suffix after the configured title
    pub fn set_title_suffix(&self, suffix: &str) {
        self.window.set_title(&format!("{} - {}", self.title, suffix));
    }

    pub fn winit(&self) -> &Window {
        &self.window
    }
}

impl SurfaceSource for SurfaceWindow {
    fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        ash_window::enumerate_required_extensions(self.window.raw_display_handle())
            .map(|extensions| extensions.to_vec())
            .map_err(|e| Error::SurfaceCreation(format!("No surface extensions for display: {e}")))
    }

    fn produce_surface(&self, entry: &Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
        let result = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.raw_display_handle(),
                self.window.raw_window_handle(),
                None,
            )
        };
        result.map_err(|e| Error::SurfaceCreation(format!("Failed to create surface: {e}")))
    }

    fn extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

/// Callbacks the loop driver invokes. Errors stop the loop and are returned
/// from [`run_loop`].
pub trait LoopHandler {
    /// The window exists (called once, before the first iteration)
    fn window_ready(&mut self, window: &SurfaceWindow) -> Result<()>;

    /// The drawable area changed; zero means minimized
    fn resized(&mut self, width: u32, height: u32);

    /// One loop iteration, after input was polled
    fn iterate(&mut self, window: &SurfaceWindow) -> Result<()>;

    /// The loop is ending; the window is still alive
    fn closing(&mut self);
}

/// Open the window and block until it is closed or a handler call fails.
pub fn run_loop<H: LoopHandler>(config: &WindowConfig, log: &LogSink, handler: &mut H) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|e| Error::Window(format!("Failed to create event loop: {e}")))?;
    // Iterate continuously instead of waiting for input
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut driver = Driver {
        config,
        log,
        handler,
        window: None,
        error: None,
        closed: false,
    };

    event_loop
        .run_app(&mut driver)
        .map_err(|e| Error::Window(format!("Event loop failed: {e}")))?;

    driver.close();
    match driver.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct Driver<'a, H> {
    config: &'a WindowConfig,
    log: &'a LogSink,
    handler: &'a mut H,
    window: Option<SurfaceWindow>,
    error: Option<Error>,
    closed: bool,
}

impl<H: LoopHandler> Driver<'_, H> {
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Error) {
        sink_error!(self.log, "{}", error);
        self.error = Some(error);
        event_loop.exit();
    }

    // Handler teardown runs while the window (and its surface) still exist
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.handler.closing();
        }
    }
}

impl<H: LoopHandler> ApplicationHandler for Driver<'_, H> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.error.is_some() {
            return;
        }

        let window = match SurfaceWindow::create(event_loop, self.config, self.log) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e),
        };

        if let Err(e) = self.handler.window_ready(&window) {
            self.window = Some(window);
            return self.fail(event_loop, e);
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                sink_info!(self.log, "Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                sink_debug!(self.log, "Window resized to {}x{}", size.width, size.height);
                self.handler.resized(size.width, size.height);
            }

            WindowEvent::RedrawRequested => {
                if self.error.is_some() {
                    return;
                }
                let Some(window) = self.window.as_ref() else {
                    return;
                };
                if let Err(e) = self.handler.iterate(window) {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    sink_info!(self.log, "ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Input for this iteration is drained; schedule the next iteration
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.winit().request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.close();
    }
}
