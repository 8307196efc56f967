// =============================================================================
// VK FRAME LOOP - minimal real-time Vulkan rendering loop
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Application (hooks: on_init / on_update / draw)                │
// │    └── Window (winit event loop, surface)                       │
// │    └── Renderer (frame pipeline)                                │
// │          └── DeviceContext + Swapchain                          │
// │                └── Frame slots (command buffer, fence, sem.)    │
// │                └── Image slots (render-finished semaphore)      │
// └─────────────────────────────────────────────────────────────────┘

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod renderer;
pub mod window;

pub use app::{AppHooks, Application, NoHooks};
pub use backend::MAX_FRAMES_IN_FLIGHT;
pub use config::Config;
pub use error::{Error, Result};
pub use logging::LogSink;
pub use renderer::{ClearColor, DrawContext, FrameCapture, Renderer};
