// =============================================================================
// FRAME PIPELINE
// =============================================================================
//
// Owns the device context, swapchain, command pool and every sync object, and
// exposes one hot-path operation: record, submit and present a frame.
//
// FRAME FLOW (render_frame):
// 1. Wait for this frame slot's in-flight fence
// 2. Acquire next swapchain image (out of date -> rebuild, skip frame)
// 3. Wait for any other frame still targeting that image
// 4. Bind the image to this slot's fence, reset the fence
// 5. Record: UNDEFINED -> COLOR_ATTACHMENT, dynamic rendering with clear,
//    caller draw commands, COLOR_ATTACHMENT -> PRESENT_SRC (via TRANSFER_SRC
//    and a copy into a readback buffer when a capture was requested)
// 6. Submit (wait image-available, signal render-finished + fence)
// 7. Present (wait render-finished)
// 8. Wait for the device to go idle
// 9. Advance the frame counter

use ash::vk;
use glam::Vec4;

use crate::backend::readback::{self, ReadbackBuffer};
use crate::backend::swapchain::color_subresource_range;
use crate::backend::sync::{self, FrameSlot, FrameTracker, ImageSlot};
use crate::backend::{Acquired, DeviceContext, SurfaceSource, Swapchain};
use crate::error::{Error, Result};
use crate::logging::LogSink;
use crate::{sink_debug, sink_info, sink_warn};

/// RGBA clear color, components clamped to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor(Vec4);

impl ClearColor {
    pub const BLACK: Self = Self(Vec4::new(0.0, 0.0, 0.0, 1.0));
    pub const WHITE: Self = Self(Vec4::ONE);

    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::from(Vec4::new(r, g, b, a))
    }

    pub fn to_array(self) -> [f32; 4] {
        self.0.to_array()
    }

    pub fn to_clear_value(self) -> vk::ClearValue {
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.to_array(),
            },
        }
    }
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::BLACK
    }
}

impl From<Vec4> for ClearColor {
    fn from(color: Vec4) -> Self {
        Self(color.clamp(Vec4::ZERO, Vec4::ONE))
    }
}

impl From<[f32; 4]> for ClearColor {
    fn from(color: [f32; 4]) -> Self {
        Self::from(Vec4::from_array(color))
    }
}

/// What the draw callback gets while the rendering scope is open
pub struct DrawContext<'a> {
    pub device: &'a ash::Device,
    pub command_buffer: vk::CommandBuffer,
    pub extent: vk::Extent2D,
    pub image_index: u32,
}

/// Host copy of one presented frame: tightly packed rows, 4 bytes per pixel
/// in the swapchain's channel order
#[derive(Debug, Clone)]
pub struct FrameCapture {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub pixels: Vec<u8>,
}

impl FrameCapture {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.extent.width || y >= self.extent.height {
            return None;
        }
        let offset = (y as usize * self.extent.width as usize + x as usize) * 4;
        let texel = self.pixels.get(offset..offset + 4)?;
        Some([texel[0], texel[1], texel[2], texel[3]])
    }
}

/// Swapchain image a frame renders into
#[derive(Debug, Clone, Copy)]
struct FrameTarget {
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
    index: u32,
}

/// Teardown checklist, run front to back by [`Renderer::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    ImageSync,
    FrameSync,
    /// Frees the command buffers with it
    CommandPool,
    /// Image views, then the chain
    Swapchain,
    /// Surface, logical device, instance
    DeviceContext,
}

pub const TEARDOWN_ORDER: [TeardownStep; 5] = [
    TeardownStep::ImageSync,
    TeardownStep::FrameSync,
    TeardownStep::CommandPool,
    TeardownStep::Swapchain,
    TeardownStep::DeviceContext,
];

pub struct Renderer {
    ctx: DeviceContext,
    swapchain: Option<Swapchain>,

    command_pool: vk::CommandPool,
    /// Sync objects + command buffer for each frame in flight
    frames: Vec<FrameSlot>,
    /// Render-finished semaphore for each swapchain image
    images: Vec<ImageSlot>,
    tracker: FrameTracker,

    clear_color: ClearColor,
    wait_stages: [vk::PipelineStageFlags; 1],

    /// Size the next rebuild targets
    requested_extent: vk::Extent2D,
    needs_rebuild: bool,

    capture_requested: bool,
    last_capture: Option<FrameCapture>,

    log: LogSink,
    shut_down: bool,
}

impl Renderer {
    /// Initialize all Vulkan resources.
    ///
    /// 1. Device context (instance, surface, GPU, queues)
    /// 2. Swapchain + per-image slots
    /// 3. Command pool + per-frame slots
    pub fn new(
        source: &dyn SurfaceSource,
        app_name: &str,
        enable_validation: bool,
        log: &LogSink,
    ) -> Result<Self> {
        sink_info!(log, "Initializing Vulkan...");

        let ctx = DeviceContext::initialize(source, app_name, enable_validation, log)?;

        // From here on, Drop unwinds whatever got created
        let mut renderer = Self {
            ctx,
            swapchain: None,
            command_pool: vk::CommandPool::null(),
            frames: Vec::new(),
            images: Vec::new(),
            tracker: FrameTracker::new(0),
            clear_color: ClearColor::default(),
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            requested_extent: source.extent(),
            needs_rebuild: true,
            capture_requested: false,
            last_capture: None,
            log: log.clone(),
            shut_down: false,
        };

        if !renderer.rebuild_swapchain()? {
            let extent = renderer.requested_extent;
            return Err(Error::SwapchainBuild(format!(
                "Surface extent is {}x{}",
                extent.width, extent.height
            )));
        }
        renderer.create_command_pool()?;

        renderer.frames = sync::create_frame_slots(&renderer.ctx.device, renderer.command_pool)?;
        sink_debug!(log, "Created Command Buffers[{}]", renderer.frames.len());
        sink_debug!(log, "Created ImageAvailableSemaphores[{}]", renderer.frames.len());
        sink_debug!(log, "Created InFlightFences[{}]", renderer.frames.len());

        sink_info!(log, "Vulkan initialized successfully!");
        Ok(renderer)
    }

    fn create_command_pool(&mut self) -> Result<()> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.ctx.queue_families.graphics)
            // Buffers are reset and re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        self.command_pool = unsafe { self.ctx.device.create_command_pool(&pool_info, None) }
            .map_err(Error::render("create command pool"))?;
        sink_debug!(self.log, "Created Command Pool: {:?}", self.command_pool);
        Ok(())
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Takes effect on the next recorded frame
    pub fn set_clear_color(&mut self, color: impl Into<ClearColor>) {
        self.clear_color = color.into();
    }

    pub fn clear_color(&self) -> ClearColor {
        self.clear_color
    }

    /// Frame slot the next `render_frame` uses
    pub fn current_frame(&self) -> usize {
        self.tracker.current_frame()
    }

    pub fn frame_slot_count(&self) -> usize {
        self.frames.len()
    }

    pub fn image_slot_count(&self) -> usize {
        self.images.len()
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn device(&self) -> &DeviceContext {
        &self.ctx
    }

    /// The window changed size; rebuild before the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.requested_extent = vk::Extent2D { width, height };
        self.needs_rebuild = true;
    }

    /// Copy the next presented frame back to host memory.
    ///
    /// Fails when the surface does not allow transfer reads from its images.
    /// Fetch the result with [`Renderer::take_capture`].
    pub fn capture_next_frame(&mut self) -> Result<()> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| Error::Capture("No swapchain to capture from".into()))?;
        readback::readback_size(swapchain.extent, swapchain.format, swapchain.image_usage)?;
        self.capture_requested = true;
        Ok(())
    }

    /// The most recent capture, if one completed since the last call
    pub fn take_capture(&mut self) -> Option<FrameCapture> {
        self.last_capture.take()
    }

    // =========================================================================
    // SWAPCHAIN REBUILD
    // =========================================================================

    /// Rebuild the swapchain at the requested extent.
    ///
    /// Returns false (and keeps the rebuild pending) while either the request
    /// or the surface itself is zero-sized, e.g. a minimized window. The
    /// current chain is kept in that case.
    pub fn rebuild_swapchain(&mut self) -> Result<bool> {
        let extent = self.requested_extent;
        if extent.width == 0 || extent.height == 0 {
            sink_debug!(self.log, "Window minimized, postponing swapchain build");
            self.needs_rebuild = true;
            return Ok(false);
        }

        // Nothing in flight may touch the old images
        self.ctx.wait_idle()?;

        let built = Swapchain::build(&self.ctx, extent, self.swapchain.as_ref());
        let swapchain = match built {
            Ok(Some(swapchain)) => swapchain,
            Ok(None) => {
                sink_debug!(self.log, "Surface minimized, postponing swapchain build");
                self.needs_rebuild = true;
                return Ok(false);
            }
            Err(e) => {
                // The driver retires the old chain even when the build fails
                self.retire_swapchain();
                return Err(e);
            }
        };
        self.retire_swapchain();

        let image_count = swapchain.image_count();
        self.requested_extent = swapchain.extent;
        self.swapchain = Some(swapchain);

        if image_count != self.images.len() {
            sync::destroy_all(&self.ctx.device, &self.images, ImageSlot::destroy);
            self.images.clear();
            self.images = sync::create_image_slots(&self.ctx.device, image_count)?;
            sink_debug!(self.log, "Created RenderFinishedSemaphores[{}]", image_count);
        }
        self.tracker.reset_images(image_count);
        self.needs_rebuild = false;
        Ok(true)
    }

    fn retire_swapchain(&mut self) {
        if let Some(previous) = self.swapchain.take() {
            previous.destroy(&self.ctx.device);
            sink_debug!(self.log, "Destroyed old Swapchain");
        }
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame.
    ///
    /// `draw` runs inside the rendering scope and may append draw commands.
    /// Returns Ok(false) when no frame was presented (minimized window, or the
    /// swapchain had to be rebuilt first); the frame counter only advances on
    /// a presented frame.
    pub fn render_frame<F>(&mut self, draw: F) -> Result<bool>
    where
        F: FnOnce(&DrawContext<'_>),
    {
        if self.needs_rebuild && !self.rebuild_swapchain()? {
            return Ok(false);
        }

        let frame_index = self.tracker.current_frame();
        let command_buffer = self.frames[frame_index].command_buffer;
        let image_available = self.frames[frame_index].image_available;
        let in_flight_fence = self.frames[frame_index].in_flight_fence;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Bound how far the CPU may run ahead
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[in_flight_fence], true, u64::MAX)
                .map_err(Error::render("wait for in-flight fence"))?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| Error::SwapchainBuild("Swapchain not initialized".into()))?;

        let image_index = match swapchain.acquire_next_image(image_available)? {
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    sink_warn!(self.log, "Swapchain is suboptimal for the surface");
                }
                index
            }
            Acquired::OutOfDate => {
                sink_info!(self.log, "Swapchain out of date, rebuilding");
                self.needs_rebuild = true;
                self.rebuild_swapchain()?;
                return Ok(false);
            }
        };

        let target = FrameTarget {
            image: swapchain.images[image_index as usize],
            view: swapchain.image_views[image_index as usize],
            extent: swapchain.extent,
            index: image_index,
        };
        let render_finished = self.images[image_index as usize].render_finished;

        let readback = if self.capture_requested {
            let buffer = readback::readback_size(target.extent, swapchain.format, swapchain.image_usage)
                .and_then(|size| ReadbackBuffer::new(&self.ctx, size));
            match buffer {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    sink_warn!(self.log, "Frame capture dropped: {}", e);
                    self.capture_requested = false;
                    None
                }
            }
        } else {
            None
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3/4: Another frame still on this image? Wait for it, then bind
        // ─────────────────────────────────────────────────────────────────────
        let fence_ready = claim_image(
            &self.ctx.device,
            &mut self.tracker,
            image_index,
            in_flight_fence,
        );

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5-8: Record, submit, present, serialize with the GPU
        // ─────────────────────────────────────────────────────────────────────
        let presented = fence_ready
            .and_then(|()| self.record(command_buffer, target, readback.as_ref(), draw))
            .and_then(|()| {
                self.submit(command_buffer, image_available, render_finished, in_flight_fence)
            })
            .and_then(|()| swapchain.present(self.ctx.present_queue, image_index, &[render_finished]))
            .and_then(|rebuild| self.ctx.wait_idle().map(|()| rebuild));

        let captured = match (&readback, &presented) {
            (Some(buffer), Ok(_)) => Some(buffer.read(&self.ctx.device)),
            _ => None,
        };
        if let Some(buffer) = readback {
            if presented.is_err() {
                if let Err(e) = self.ctx.wait_idle() {
                    sink_warn!(self.log, "Device did not go idle after a failed frame: {}", e);
                }
            }
            buffer.destroy(&self.ctx.device);
        }

        if presented? {
            self.needs_rebuild = true;
        }
        if let Some(pixels) = captured {
            self.last_capture = Some(FrameCapture {
                extent: target.extent,
                format: swapchain.format,
                pixels: pixels?,
            });
            self.capture_requested = false;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 9: Advance
        // ─────────────────────────────────────────────────────────────────────
        self.tracker.advance();

        Ok(true)
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        image_available: vk::Semaphore,
        render_finished: vk::Semaphore,
        in_flight_fence: vk::Fence,
    ) -> Result<()> {
        let wait_semaphores = [image_available];
        let signal_semaphores = [render_finished];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, &[submit_info.build()], in_flight_fence)
                .map_err(Error::render("queue submit"))?;
        }
        Ok(())
    }

    fn record<F>(
        &self,
        cmd: vk::CommandBuffer,
        target: FrameTarget,
        readback: Option<&ReadbackBuffer>,
        draw: F,
    ) -> Result<()>
    where
        F: FnOnce(&DrawContext<'_>),
    {
        let device = &self.ctx.device;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(Error::render("reset command buffer"))?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(Error::render("begin command buffer"))?;

            // Old contents are cleared anyway
            transition_image(
                device,
                cmd,
                target.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );

            let color_attachments = [vk::RenderingAttachmentInfo::builder()
                .image_view(target.view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(self.clear_color.to_clear_value())
                .build()];

            let rendering_info = vk::RenderingInfo::builder()
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: target.extent,
                })
                .layer_count(1)
                .color_attachments(&color_attachments);

            device.cmd_begin_rendering(cmd, &rendering_info);

            draw(&DrawContext {
                device,
                command_buffer: cmd,
                extent: target.extent,
                image_index: target.index,
            });

            device.cmd_end_rendering(cmd);

            match readback {
                Some(buffer) => {
                    transition_image(
                        device,
                        cmd,
                        target.image,
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    );
                    copy_to_readback(device, cmd, target, buffer.buffer);
                    transition_image(
                        device,
                        cmd,
                        target.image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::ImageLayout::PRESENT_SRC_KHR,
                    );
                }
                None => transition_image(
                    device,
                    cmd,
                    target.image,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                ),
            }

            device
                .end_command_buffer(cmd)
                .map_err(Error::render("end command buffer"))?;
        }

        Ok(())
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    /// Wait for the GPU, then destroy everything in [`TEARDOWN_ORDER`].
    ///
    /// Safe after zero rendered frames; later calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        sink_info!(self.log, "Cleaning up Vulkan resources...");
        if let Err(e) = self.ctx.wait_idle() {
            sink_warn!(self.log, "Device did not go idle before teardown: {}", e);
        }

        for step in TEARDOWN_ORDER {
            self.teardown(step);
        }

        sink_info!(self.log, "Cleanup complete");
    }

    fn teardown(&mut self, step: TeardownStep) {
        let device = &self.ctx.device;
        match step {
            TeardownStep::ImageSync => {
                sync::destroy_all(device, &self.images, ImageSlot::destroy);
                self.images.clear();
            }
            TeardownStep::FrameSync => {
                sync::destroy_all(device, &self.frames, FrameSlot::destroy);
                self.frames.clear();
            }
            TeardownStep::CommandPool => {
                if self.command_pool != vk::CommandPool::null() {
                    unsafe { device.destroy_command_pool(self.command_pool, None) };
                    self.command_pool = vk::CommandPool::null();
                }
            }
            TeardownStep::Swapchain => {
                if let Some(swapchain) = self.swapchain.take() {
                    swapchain.destroy(device);
                }
            }
            TeardownStep::DeviceContext => self.ctx.destroy(),
        }
        sink_debug!(self.log, "Teardown: {:?}", step);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wait out any other frame still targeting `image_index`, bind the image to
/// this frame's fence and reset that fence for the coming submit.
fn claim_image(
    device: &ash::Device,
    tracker: &mut FrameTracker,
    image_index: u32,
    in_flight_fence: vk::Fence,
) -> Result<()> {
    if let Some(image_fence) = tracker.claim_image(image_index, in_flight_fence) {
        unsafe {
            device
                .wait_for_fences(&[image_fence], true, u64::MAX)
                .map_err(Error::render("wait for image-in-flight fence"))?;
        }
    }

    unsafe {
        device
            .reset_fences(&[in_flight_fence])
            .map_err(Error::render("reset in-flight fence"))?;
    }
    Ok(())
}

/// Record a layout transition for a swapchain color image.
///
/// Rendering transitions synchronize on COLOR_ATTACHMENT_OUTPUT, the stage
/// the image-available semaphore is waited at.
unsafe fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = barrier_masks(old_layout, new_layout);

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
        .build();

    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

fn barrier_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
) {
    match (old_layout, new_layout) {
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL) => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        (_, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        _ => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
    }
}

/// Copy the whole image into `buffer` and make the bytes visible to the host
/// once the frame's fence signals.
unsafe fn copy_to_readback(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: FrameTarget,
    buffer: vk::Buffer,
) {
    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        // tightly packed
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width: target.extent.width,
            height: target.extent.height,
            depth: 1,
        })
        .build();

    device.cmd_copy_image_to_buffer(
        cmd,
        target.image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        buffer,
        &[region],
    );

    let host_barrier = vk::BufferMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::HOST_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
        .build();

    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::HOST,
        vk::DependencyFlags::empty(),
        &[],
        &[host_barrier],
        &[],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_color_clamps_components() {
        let color = ClearColor::new(1.5, -0.25, 0.5, 1.0);
        assert_eq!(color.to_array(), [1.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn clear_color_from_array_and_vec4_agree() {
        let from_array = ClearColor::from([0.1, 0.2, 0.3, 0.4]);
        let from_vec = ClearColor::from(Vec4::new(0.1, 0.2, 0.3, 0.4));
        assert_eq!(from_array, from_vec);
    }

    #[test]
    fn white_clear_value() {
        let value = ClearColor::WHITE.to_clear_value();
        assert_eq!(unsafe { value.color.float32 }, [1.0; 4]);
        assert_eq!(ClearColor::default(), ClearColor::BLACK);
    }

    #[test]
    fn teardown_runs_in_reverse_creation_order() {
        let position = |step| TEARDOWN_ORDER.iter().position(|&s| s == step).unwrap();

        // sync objects and pool go before the swapchain they were sized for
        assert!(position(TeardownStep::ImageSync) < position(TeardownStep::Swapchain));
        assert!(position(TeardownStep::FrameSync) < position(TeardownStep::CommandPool));
        assert!(position(TeardownStep::CommandPool) < position(TeardownStep::Swapchain));
        // device context (surface, device, instance) is always last
        assert_eq!(TEARDOWN_ORDER.last(), Some(&TeardownStep::DeviceContext));
    }

    #[test]
    fn layout_barriers_wait_on_color_output() {
        let (src, dst, src_stage, dst_stage) = barrier_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(src, vk::AccessFlags::empty());
        assert_eq!(dst, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        let (src, _, src_stage, dst_stage) = barrier_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(src, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn capture_path_orders_clear_before_copy() {
        let (src, dst, src_stage, dst_stage) = barrier_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(src, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(dst, vk::AccessFlags::TRANSFER_READ);
        assert_eq!(src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (_, _, src_stage, dst_stage) = barrier_masks(
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn capture_pixels_are_row_major() {
        let capture = FrameCapture {
            extent: vk::Extent2D { width: 2, height: 2 },
            format: vk::Format::B8G8R8A8_UNORM,
            pixels: (0..16).collect(),
        };
        assert_eq!(capture.pixel(0, 0), Some([0, 1, 2, 3]));
        assert_eq!(capture.pixel(1, 1), Some([12, 13, 14, 15]));
        assert_eq!(capture.pixel(2, 0), None);
    }
}
