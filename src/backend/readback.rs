// Readback buffer - host-visible copy target
//
// Where a captured swapchain image lands so the CPU can look at its pixels.
// Plain device memory from a HOST_VISIBLE | HOST_COHERENT type, mapped only
// while reading.

use ash::vk;

use super::DeviceContext;
use crate::error::{Error, Result};

/// Buffer + memory a frame is copied into
pub struct ReadbackBuffer {
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl ReadbackBuffer {
    pub fn new(ctx: &DeviceContext, size: vk::DeviceSize) -> Result<Self> {
        let device = &ctx.device;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(Error::render("create readback buffer"))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_properties = unsafe {
            ctx.instance
                .get_physical_device_memory_properties(ctx.physical_device)
        };

        let Some(memory_type_index) = find_memory_type(
            &memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) else {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(Error::Capture("No host-visible memory type for readback".into()));
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(Error::render("allocate readback memory")(e));
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(Error::render("bind readback memory")(e));
        }

        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    /// Copy the contents out. Every submission writing the buffer must have
    /// completed.
    pub fn read(&self, device: &ash::Device) -> Result<Vec<u8>> {
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(Error::render("map readback memory"))?;
            let bytes = std::slice::from_raw_parts(ptr as *const u8, self.size as usize).to_vec();
            device.unmap_memory(self.memory);
            Ok(bytes)
        }
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// First memory type allowed by `type_filter` that has every `required` flag
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..properties.memory_type_count).find(|&i| {
        type_filter & (1 << i) != 0
            && properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// 8-bit RGBA/BGRA formats only; those are what surfaces hand out
pub fn bytes_per_pixel(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::B8G8R8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::R8G8B8A8_UNORM => Some(4),
        _ => None,
    }
}

/// Byte size of a tightly packed copy of one swapchain image
pub fn readback_size(
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> Result<vk::DeviceSize> {
    if !usage.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        return Err(Error::Capture(
            "Surface does not allow transfer reads from swapchain images".into(),
        ));
    }
    let bpp = bytes_per_pixel(format)
        .ok_or_else(|| Error::Capture(format!("Cannot read back {:?} images", format)))?;

    Ok(extent.width as vk::DeviceSize * extent.height as vk::DeviceSize * bpp as vk::DeviceSize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        for (slot, &flags) in properties.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        properties.memory_type_count = types.len() as u32;
        properties
    }

    #[test]
    fn host_visible_type_found_within_filter() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&properties, 0b111, host), Some(2));
        // type 2 excluded by the buffer's requirements
        assert_eq!(find_memory_type(&properties, 0b011, host), None);
        assert_eq!(
            find_memory_type(&properties, 0b011, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }

    #[test]
    fn readback_size_is_tightly_packed() {
        let size = readback_size(
            vk::Extent2D { width: 600, height: 800 },
            vk::Format::B8G8R8A8_SRGB,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        );
        assert_eq!(size.ok(), Some(600 * 800 * 4));
    }

    #[test]
    fn readback_needs_transfer_source_usage() {
        let size = readback_size(
            vk::Extent2D { width: 600, height: 800 },
            vk::Format::B8G8R8A8_SRGB,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        );
        assert!(matches!(size, Err(Error::Capture(_))));
    }

    #[test]
    fn wide_formats_are_not_read_back() {
        assert_eq!(bytes_per_pixel(vk::Format::R16G16B16A16_SFLOAT), None);
        let size = readback_size(
            vk::Extent2D { width: 4, height: 4 },
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::TRANSFER_SRC,
        );
        assert!(matches!(size, Err(Error::Capture(_))));
    }
}
