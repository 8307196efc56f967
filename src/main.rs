// =============================================================================
// HELLO SCREEN - clear a 600x800 window to opaque white
// =============================================================================
//
// Reads config.toml when present; otherwise runs with the sample settings.

use anyhow::Result;
use log::LevelFilter;
use std::path::Path;
use vk_frame_loop::{sink_error, sink_info, AppHooks, Application, Config, LogSink};

struct HelloScreen;

impl AppHooks for HelloScreen {
    fn on_init(&mut self, app: &mut Application) {
        app.set_clear_color(1.0, 1.0, 1.0, 1.0);
    }
}

fn main() -> Result<()> {
    let bootstrap = LogSink::stderr(LevelFilter::Info);
    let config = if Path::new("config.toml").exists() {
        Config::load(&bootstrap)
    } else {
        Config::with_window(600, 800, "HelloScreen")
    };

    let log = LogSink::stderr(config.log_level());
    sink_info!(log, "Starting Vulkan renderer");

    let app = Application::new(config, log.clone());
    if let Err(e) = app.run(HelloScreen) {
        sink_error!(log, "Fatal: {}", e);
        log.flush();
        return Err(e.into());
    }

    sink_info!(log, "Exited cleanly");
    Ok(())
}
