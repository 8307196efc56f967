// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
//
// Two kinds of slots:
// - frame slots (F of them): command buffer, "image available" semaphore,
//   "in flight" fence. Indexed by the frame counter modulo F.
// - image slots (N of them, one per swapchain image): "render finished"
//   semaphore. Which frame fence last used each image is tracked by
//   `FrameTracker`, because N need not equal F.

use ash::vk;

use crate::error::{Error, Result};

/// Frames the CPU may record/submit ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Per-frame resources - one per frame in flight
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSlot {
    fn new(device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .map_err(Error::render("create semaphore"))?;
            let in_flight_fence = match device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(Error::render("create fence")(e));
                }
            };

            Ok(Self {
                command_buffer,
                image_available,
                in_flight_fence,
            })
        }
    }

    /// Command buffer is freed with its pool, not here
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Per-image resources - one per swapchain image
pub struct ImageSlot {
    pub render_finished: vk::Semaphore,
}

impl ImageSlot {
    fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let render_finished = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(Error::render("create semaphore"))?;
        Ok(Self { render_finished })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_semaphore(self.render_finished, None) };
    }
}

/// Allocate `MAX_FRAMES_IN_FLIGHT` command buffers from `pool` and build a
/// frame slot around each.
pub fn create_frame_slots(device: &ash::Device, pool: vk::CommandPool) -> Result<Vec<FrameSlot>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);

    let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(Error::render("allocate command buffers"))?;

    let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
    for command_buffer in command_buffers {
        match FrameSlot::new(device, command_buffer) {
            Ok(slot) => slots.push(slot),
            Err(e) => {
                destroy_all(device, &slots, FrameSlot::destroy);
                return Err(e);
            }
        }
    }
    Ok(slots)
}

/// One image slot per swapchain image
pub fn create_image_slots(device: &ash::Device, image_count: usize) -> Result<Vec<ImageSlot>> {
    let mut slots = Vec::with_capacity(image_count);
    for _ in 0..image_count {
        match ImageSlot::new(device) {
            Ok(slot) => slots.push(slot),
            Err(e) => {
                destroy_all(device, &slots, ImageSlot::destroy);
                return Err(e);
            }
        }
    }
    Ok(slots)
}

pub fn destroy_all<T>(device: &ash::Device, slots: &[T], destroy: fn(&T, &ash::Device)) {
    for slot in slots {
        destroy(slot, device);
    }
}

/// Frame counter plus the image -> in-flight fence aliasing.
///
/// Pure bookkeeping: decides which fences a frame has to wait on, the
/// renderer does the waiting.
#[derive(Debug, Clone)]
pub struct FrameTracker {
    current_frame: usize,
    images_in_flight: Vec<Option<vk::Fence>>,
}

impl FrameTracker {
    pub fn new(image_count: usize) -> Self {
        Self {
            current_frame: 0,
            images_in_flight: vec![None; image_count],
        }
    }

    /// Frame slot index in `[0, MAX_FRAMES_IN_FLIGHT)`
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    /// Fence last bound to `image_index`, if any
    pub fn image_fence(&self, image_index: u32) -> Option<vk::Fence> {
        self.images_in_flight
            .get(image_index as usize)
            .copied()
            .flatten()
    }

    /// Bind `image_index` to `frame_fence`.
    ///
    /// Returns the fence of an earlier frame that still targets this image;
    /// the caller must wait on it before recording. A fence equal to
    /// `frame_fence` was already waited on at the start of the frame.
    pub fn claim_image(&mut self, image_index: u32, frame_fence: vk::Fence) -> Option<vk::Fence> {
        let slot = &mut self.images_in_flight[image_index as usize];
        let previous = slot.replace(frame_fence);
        previous.filter(|&fence| fence != frame_fence)
    }

    /// `current_frame = (current_frame + 1) mod F`
    pub fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
    }

    /// Forget image bindings after a swapchain rebuild with `image_count` images
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fence(raw: u64) -> vk::Fence {
        vk::Fence::from_raw(raw)
    }

    // Stand-in for the renderer's per-slot fences
    fn frame_fence(slot: usize) -> vk::Fence {
        fence(100 + slot as u64)
    }

    #[test]
    fn max_frames_in_flight_is_two() {
        assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);
    }

    #[test]
    fn current_frame_is_round_robin() {
        let mut tracker = FrameTracker::new(3);
        for k in 0..10 {
            assert_eq!(tracker.current_frame(), k % MAX_FRAMES_IN_FLIGHT);
            tracker.advance();
        }
        assert_eq!(tracker.current_frame(), 10 % MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn fresh_image_needs_no_extra_wait() {
        let mut tracker = FrameTracker::new(3);
        assert_eq!(tracker.claim_image(0, frame_fence(0)), None);
        assert_eq!(tracker.image_fence(0), Some(frame_fence(0)));
        assert_eq!(tracker.image_fence(1), None);
    }

    #[test]
    fn image_reused_by_other_frame_waits_on_its_fence() {
        let mut tracker = FrameTracker::new(3);

        // frame 0 renders image 2
        assert_eq!(tracker.claim_image(2, frame_fence(0)), None);
        tracker.advance();

        // frame 1 gets image 2 again: must wait for frame 0's submission
        assert_eq!(tracker.claim_image(2, frame_fence(1)), Some(frame_fence(0)));
        assert_eq!(tracker.image_fence(2), Some(frame_fence(1)));
    }

    #[test]
    fn image_reused_by_same_frame_slot_needs_no_extra_wait() {
        let mut tracker = FrameTracker::new(3);
        tracker.claim_image(1, frame_fence(0));
        // Same slot fence is waited at frame start already
        assert_eq!(tracker.claim_image(1, frame_fence(0)), None);
    }

    #[test]
    fn frame_f_plus_one_reuses_first_slot() {
        let mut tracker = FrameTracker::new(3);
        let mut first_waits = Vec::new();
        for _ in 0..=MAX_FRAMES_IN_FLIGHT {
            first_waits.push(frame_fence(tracker.current_frame()));
            tracker.advance();
        }
        // The (F+1)-th frame blocks on the same fence the first frame signalled
        assert_eq!(first_waits[MAX_FRAMES_IN_FLIGHT], first_waits[0]);
        assert_ne!(first_waits[1], first_waits[0]);
    }

    #[test]
    fn non_adjacent_reuse_observes_first_submission() {
        // N = 3 images, F = 2 slots: image 0 used by frames 0 and 3
        let mut tracker = FrameTracker::new(3);
        let sequence = [0u32, 1, 2, 0];
        let mut waits = Vec::new();
        for image in sequence {
            let fence = frame_fence(tracker.current_frame());
            waits.push(tracker.claim_image(image, fence));
            tracker.advance();
        }
        // frame 3 runs on slot 1, image 0 was last bound to slot 0's fence
        assert_eq!(waits, vec![None, None, None, Some(frame_fence(0))]);
    }

    #[test]
    fn reset_images_resizes_and_clears() {
        let mut tracker = FrameTracker::new(2);
        tracker.claim_image(0, frame_fence(0));
        tracker.advance();

        tracker.reset_images(4);
        assert_eq!(tracker.image_count(), 4);
        assert!((0..4).all(|i| tracker.image_fence(i).is_none()));
        // the frame counter survives a rebuild
        assert_eq!(tracker.current_frame(), 1);
    }
}
