// Headless surface - VK_EXT_headless_surface
//
// A presentable surface with no window behind it. Lets the whole frame loop
// (swapchain included) run on CI machines and in GPU smoke tests.

use ash::extensions::{ext::HeadlessSurface as HeadlessSurfaceLoader, khr};
use ash::{vk, Entry};
use std::ffi::c_char;

use super::SurfaceSource;
use crate::error::{Error, Result};

/// Fixed-size surface source without a window
#[derive(Debug, Clone, Copy)]
pub struct HeadlessSurface {
    pub width: u32,
    pub height: u32,
}

impl HeadlessSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl SurfaceSource for HeadlessSurface {
    fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        Ok(vec![
            khr::Surface::name().as_ptr(),
            HeadlessSurfaceLoader::name().as_ptr(),
        ])
    }

    fn produce_surface(&self, entry: &Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
        let loader = HeadlessSurfaceLoader::new(entry, instance);
        let create_info = vk::HeadlessSurfaceCreateInfoEXT::builder();

        let result = unsafe { loader.create_headless_surface(&create_info, None) };
        result.map_err(|e| Error::SurfaceCreation(format!("Failed to create headless surface: {e}")))
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}
