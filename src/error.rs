// Error taxonomy
//
// Every variant is fatal where it is raised. The only recoverable condition
// (swapchain out of date) never surfaces as an error: the renderer rebuilds.

use ash::vk;
use thiserror::Error;

/// Renderer error type.
#[derive(Error, Debug)]
pub enum Error {
    /// No physical device satisfies the required version/features, or the
    /// instance/logical device could not be created
    #[error("Device initialization failed: {0}")]
    DeviceInit(String),

    /// The window could not produce a presentable surface
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// The driver rejected the requested swapchain (lost surface, zero extent, ...)
    #[error("Swapchain build failed: {0}")]
    SwapchainBuild(String),

    /// Non-recoverable failure acquiring the next presentable image
    #[error("Failed to acquire swapchain image: {0}")]
    Acquire(vk::Result),

    /// A driver call inside the frame (or its setup) failed
    #[error("Render failed ({stage}): {result}")]
    Render {
        stage: &'static str,
        result: vk::Result,
    },

    /// A requested frame capture cannot be served (no transfer usage,
    /// unsupported format, no host-visible memory)
    #[error("Frame capture failed: {0}")]
    Capture(String),

    /// Event loop or window creation failed
    #[error("Window error: {0}")]
    Window(String),

    /// Config text is malformed, or the window record is unusable (zero size)
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Adapter for `map_err` on raw driver results inside the frame.
    pub(crate) fn render(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Render { stage, result }
    }

    pub(crate) fn device_init(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::DeviceInit(format!("{what}: {result}"))
    }

    pub(crate) fn swapchain_build(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::SwapchainBuild(format!("{what}: {result}"))
    }
}

/// Result type alias using the renderer's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_names_the_stage() {
        let err = Error::render("queue submit")(vk::Result::ERROR_DEVICE_LOST);
        let text = err.to_string();
        assert!(text.contains("queue submit"));
        assert!(matches!(
            err,
            Error::Render {
                result: vk::Result::ERROR_DEVICE_LOST,
                ..
            }
        ));
    }

    #[test]
    fn swapchain_build_error_keeps_driver_result() {
        let err = Error::swapchain_build("create swapchain")(vk::Result::ERROR_SURFACE_LOST_KHR);
        assert!(matches!(err, Error::SwapchainBuild(ref msg) if msg.starts_with("create swapchain")));
    }

    #[test]
    fn config_error_carries_the_reason() {
        let err = Error::Config("Window size must be nonzero, got 0x800".into());
        assert_eq!(err.to_string(), "Config error: Window size must be nonzero, got 0x800");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
