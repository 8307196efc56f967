// =============================================================================
// APPLICATION SHELL
// =============================================================================
//
// Ties window, renderer and caller hooks together:
//   run() -> window ready -> Renderer::new -> on_init
//         -> per iteration: on_update(dt) -> render_frame(draw)
//         -> window closing -> Renderer::shutdown

use std::time::Instant;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::LogSink;
use crate::renderer::{ClearColor, DrawContext, Renderer};
use crate::window::{self, LoopHandler, SurfaceWindow};
use crate::{sink_debug, sink_info};

/// Lifecycle callbacks; every method has a no-op default.
pub trait AppHooks {
    /// Once, after the renderer exists and before the first frame
    fn on_init(&mut self, _app: &mut Application) {}

    /// Every iteration, before the frame is rendered
    fn on_update(&mut self, _app: &mut Application, _delta_seconds: f32) {}

    /// Inside the rendering scope; append draw commands here
    fn draw(&mut self, _ctx: &DrawContext<'_>) {}
}

/// Hooks that do nothing: clear the screen every frame.
pub struct NoHooks;

impl AppHooks for NoHooks {}

pub struct Application {
    config: Config,
    log: LogSink,
    clear_color: ClearColor,
    renderer: Option<Renderer>,
}

impl Application {
    pub fn new(config: Config, log: LogSink) -> Self {
        let clear_color = ClearColor::from(config.graphics.clear_color);
        Self {
            config,
            log,
            clear_color,
            renderer: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Effective on the next recorded frame. Components are clamped to [0, 1].
    pub fn set_clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear_color = ClearColor::new(r, g, b, a);
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_clear_color(self.clear_color);
        }
    }

    pub fn clear_color(&self) -> ClearColor {
        self.clear_color
    }

    /// Present once the window is up
    pub fn renderer(&self) -> Option<&Renderer> {
        self.renderer.as_ref()
    }

    /// Open the window and render until it closes.
    ///
    /// Blocks. Any fatal renderer error stops the loop and is returned.
    pub fn run<H: AppHooks>(self, hooks: H) -> Result<()> {
        let window_config = self.config.window.clone();
        if window_config.width == 0 || window_config.height == 0 {
            return Err(Error::Config(format!(
                "Window size must be nonzero, got {}x{}",
                window_config.width, window_config.height
            )));
        }

        let log = self.log.clone();
        sink_info!(
            log,
            "Window: {}x{} ({})",
            window_config.width, window_config.height, window_config.title
        );

        let mut shell = Shell {
            app: self,
            hooks,
            timer: FrameTimer::new(Instant::now()),
        };
        window::run_loop(&window_config, &log, &mut shell)
    }
}

struct Shell<H> {
    app: Application,
    hooks: H,
    timer: FrameTimer,
}

impl<H: AppHooks> LoopHandler for Shell<H> {
    fn window_ready(&mut self, window: &SurfaceWindow) -> Result<()> {
        let app = &mut self.app;
        let mut renderer = Renderer::new(
            window,
            window.title(),
            app.config.validation_enabled(),
            &app.log,
        )?;
        renderer.set_clear_color(app.clear_color);
        app.renderer = Some(renderer);

        self.hooks.on_init(&mut self.app);
        sink_debug!(self.app.log, "Starting Application...");
        self.timer = FrameTimer::new(Instant::now());
        Ok(())
    }

    fn resized(&mut self, width: u32, height: u32) {
        if let Some(renderer) = self.app.renderer.as_mut() {
            renderer.resize(width, height);
        }
    }

    fn iterate(&mut self, window: &SurfaceWindow) -> Result<()> {
        let tick = self.timer.tick(Instant::now());
        self.hooks.on_update(&mut self.app, tick.delta_seconds);

        let Some(renderer) = self.app.renderer.as_mut() else {
            return Ok(());
        };
        let hooks = &mut self.hooks;
        renderer.render_frame(|ctx| hooks.draw(ctx))?;

        if self.app.config.debug.show_fps {
            if let Some(fps) = tick.fps {
                window.set_title_suffix(&format!(
                    "{:.0} FPS ({:.2}ms)",
                    fps,
                    tick.delta_seconds * 1000.0
                ));
            }
        }
        Ok(())
    }

    fn closing(&mut self) {
        if let Some(mut renderer) = self.app.renderer.take() {
            renderer.shutdown();
        }
        self.app.log.flush();
    }
}

/// Result of one timer tick
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tick {
    delta_seconds: f32,
    /// Average over the last second, reported about once per second
    fps: Option<f32>,
}

struct FrameTimer {
    last_frame: Instant,
    last_report: Instant,
    frames: u32,
}

impl FrameTimer {
    fn new(now: Instant) -> Self {
        Self {
            last_frame: now,
            last_report: now,
            frames: 0,
        }
    }

    fn tick(&mut self, now: Instant) -> Tick {
        let delta_seconds = now.saturating_duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.last_report).as_secs_f32();
        let fps = if elapsed >= 1.0 {
            let fps = self.frames as f32 / elapsed;
            self.frames = 0;
            self.last_report = now;
            Some(fps)
        } else {
            None
        };

        Tick { delta_seconds, fps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture::CaptureLog;
    use std::sync::Arc;
    use std::time::Duration;

    fn app(config: Config) -> Application {
        Application::new(config, LogSink::new(Arc::new(CaptureLog::default())))
    }

    #[test]
    fn clear_color_comes_from_config() {
        let mut config = Config::with_window(600, 800, "HelloScreen");
        config.graphics.clear_color = [0.2, 0.4, 0.6, 1.0];
        assert_eq!(app(config).clear_color().to_array(), [0.2, 0.4, 0.6, 1.0]);
    }

    #[test]
    fn clear_color_can_be_set_before_renderer_exists() {
        let mut app = app(Config::with_window(600, 800, "HelloScreen"));
        app.set_clear_color(1.0, 1.0, 1.0, 1.0);
        assert_eq!(app.clear_color(), ClearColor::WHITE);
        assert!(app.renderer().is_none());
    }

    #[test]
    fn zero_sized_window_is_rejected_before_the_loop() {
        let result = app(Config::with_window(0, 800, "Broken")).run(NoHooks);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn hooks_default_to_no_ops() {
        struct Counting(u32);
        impl AppHooks for Counting {
            fn on_update(&mut self, _app: &mut Application, _dt: f32) {
                self.0 += 1;
            }
        }

        let mut app = app(Config::default());
        let mut hooks = Counting(0);
        hooks.on_init(&mut app);
        hooks.on_update(&mut app, 0.016);
        NoHooks.on_update(&mut app, 0.016);
        assert_eq!(hooks.0, 1);
    }

    #[test]
    fn timer_reports_delta_each_tick() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);
        let tick = timer.tick(start + Duration::from_millis(16));
        assert!((tick.delta_seconds - 0.016).abs() < 1e-4);
        assert_eq!(tick.fps, None);
    }

    #[test]
    fn timer_reports_fps_once_per_second() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);
        let mut reports = Vec::new();
        for i in 1..=120 {
            let tick = timer.tick(start + Duration::from_millis(i * 10));
            if let Some(fps) = tick.fps {
                reports.push(fps);
            }
        }
        // 100 frames in the first second, 20 more that don't reach a second
        assert_eq!(reports.len(), 1);
        assert!((reports[0] - 100.0).abs() < 0.5);
    }
}
