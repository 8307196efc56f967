// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash, explicit ownership and teardown order

pub mod device;
pub mod headless;
pub mod readback;
pub mod swapchain;
pub mod sync;

pub use device::{DeviceContext, QueueFamilies, SurfaceSource};
pub use headless::HeadlessSurface;
pub use readback::ReadbackBuffer;
pub use swapchain::{Acquired, Swapchain};
pub use sync::{FrameSlot, FrameTracker, ImageSlot, MAX_FRAMES_IN_FLIGHT};
