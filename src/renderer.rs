// =============================================================================
// RENDERER - Vulkan object graph and the per-frame loop
// =============================================================================
//
// FRAME FLOW (per frame-in-flight slot):
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ wait fence ─> acquire image ─> reset fence ─> update UBO ─> record ─>    │
// │ submit (wait image_available, signal render_finished, fence) ─> present │
// └──────────────────────────────────────────────────────────────────────────┘
//
// The swapchain (and everything sized after it) is rebuilt whenever
// acquisition or presentation reports it stale, or the window was resized.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Instant;
use winit::window::Window;

use crate::backend::buffer::{self, Buffer};
use crate::backend::pipeline::{self, GraphicsPipeline};
use crate::backend::swapchain::{self, AcquiredImage};
use crate::backend::sync::{FrameCursor, FrameSync, SurfaceState};
use crate::backend::texture::Texture;
use crate::backend::{commands, descriptor, Swapchain, VulkanDevice};
use crate::config::Config;
use crate::scene::{self, UniformBufferObject, QUAD_INDICES, QUAD_VERTICES};

/// All Vulkan resources needed to draw the quad.
///
/// Buffers, the texture and the swapchain free themselves on drop and keep
/// the device alive through their own `Arc`; raw handles are destroyed in
/// `Drop for Renderer`.
pub struct Renderer {
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // SWAPCHAIN-SIZED RESOURCES (rebuilt on resize)
    // ─────────────────────────────────────────────────────────────────────────
    swapchain: Option<Swapchain>,
    framebuffers: Vec<vk::Framebuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // PIPELINE
    // ─────────────────────────────────────────────────────────────────────────
    render_pass: vk::RenderPass,
    render_pass_format: vk::Format,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline: GraphicsPipeline,

    // ─────────────────────────────────────────────────────────────────────────
    // RESOURCES
    // ─────────────────────────────────────────────────────────────────────────
    command_pool: vk::CommandPool,
    /// Only reached through the descriptor sets, kept alive with them
    _texture: Texture,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    /// One per frame in flight, persistently mapped
    uniform_buffers: Vec<Buffer>,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,

    // ─────────────────────────────────────────────────────────────────────────
    // PER-FRAME STATE
    // ─────────────────────────────────────────────────────────────────────────
    command_buffers: Vec<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    frame: FrameCursor,

    surface: SurfaceState,
    start_time: Instant,

    device: Arc<VulkanDevice>,
    window: Arc<Window>,
}

impl Renderer {
    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    pub fn new(window: Arc<Window>, config: Config) -> Result<Self> {
        use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

        log::info!("Initializing Vulkan...");

        let device = VulkanDevice::new(
            &config.window.title,
            config.validation_enabled(),
            window.raw_display_handle(),
            window.raw_window_handle(),
        )?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(device.clone(), config.present_mode(), size.width, size.height)?;

        let mut guard = InitGuard {
            device: device.clone(),
            handles: InitHandles::default(),
        };
        let handles = &mut guard.handles;

        handles.render_pass = pipeline::create_render_pass(&device, swapchain.format)?;
        handles.descriptor_set_layout = descriptor::create_descriptor_set_layout(&device)?;
        handles.pipeline = pipeline::create_graphics_pipeline(
            &device,
            handles.render_pass,
            handles.descriptor_set_layout,
            &config.assets.vertex_shader,
            &config.assets.fragment_shader,
        )?;
        handles.framebuffers = pipeline::create_framebuffers(
            &device,
            &swapchain.image_views,
            handles.render_pass,
            swapchain.extent,
        )?;

        handles.command_pool = commands::create_command_pool(&device, device.queue_families.graphics)?;
        let command_pool = handles.command_pool;

        let texture = Texture::from_file(
            &device,
            command_pool,
            &config.assets.texture,
            config.graphics.anisotropy,
        )?;

        let vertex_buffer = buffer::create_device_local_buffer(
            &device,
            command_pool,
            "vertex buffer",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &QUAD_VERTICES,
        )?;
        let index_buffer = buffer::create_device_local_buffer(
            &device,
            command_pool,
            "index buffer",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &QUAD_INDICES,
        )?;

        let frames_in_flight = config.frames_in_flight();
        let uniform_buffers =
            buffer::create_uniform_buffers(&device, frames_in_flight, UniformBufferObject::size())?;

        handles.descriptor_pool = descriptor::create_descriptor_pool(&device, frames_in_flight as u32)?;
        let descriptor_sets = descriptor::create_descriptor_sets(
            &device,
            handles.descriptor_pool,
            handles.descriptor_set_layout,
            &uniform_buffers,
            UniformBufferObject::size(),
            &texture,
        )?;

        let command_buffers =
            commands::allocate_command_buffers(&device, command_pool, frames_in_flight as u32)?;

        for _ in 0..frames_in_flight {
            handles.frame_sync.push(FrameSync::new(&device)?);
        }

        let handles = guard.finish();
        log::info!("Vulkan initialized successfully ({} frames in flight)", frames_in_flight);

        Ok(Self {
            config,
            render_pass_format: swapchain.format,
            swapchain: Some(swapchain),
            framebuffers: handles.framebuffers,
            render_pass: handles.render_pass,
            descriptor_set_layout: handles.descriptor_set_layout,
            pipeline: handles.pipeline,
            command_pool: handles.command_pool,
            _texture: texture,
            vertex_buffer,
            index_buffer,
            uniform_buffers,
            descriptor_pool: handles.descriptor_pool,
            descriptor_sets,
            command_buffers,
            frame_sync: handles.frame_sync,
            frame: FrameCursor::new(frames_in_flight),
            surface: SurfaceState::new(size.width, size.height),
            start_time: Instant::now(),
            device,
            window,
        })
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. Returns false when nothing was presented
    /// (minimized window, or the swapchain had to be rebuilt first).
    pub fn draw_frame(&mut self) -> Result<bool> {
        if !self.surface.should_draw() {
            return Ok(false);
        }

        let slot = self.frame.current();
        let device = self.device.clone();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until the GPU is done with this slot's previous frame
        // ─────────────────────────────────────────────────────────────────────
        self.frame_sync[slot].wait(&device.device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let acquired = self
            .swapchain
            .as_ref()
            .context("Swapchain not initialized")?
            .acquire_next_image(self.frame_sync[slot].image_available)?;
        let image_index = match acquired {
            AcquiredImage::Ready { index, suboptimal } => {
                if suboptimal {
                    log::debug!("Acquired image from a suboptimal swapchain");
                }
                index
            }
            AcquiredImage::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate_swapchain()?;
                return Ok(false);
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Reset the fence only now that work will be submitted
        // ─────────────────────────────────────────────────────────────────────
        self.frame_sync[slot].reset(&device.device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Update this slot's uniforms and re-record its commands
        // ─────────────────────────────────────────────────────────────────────
        self.update_uniform_buffer(slot)?;

        let cmd = self.command_buffers[slot];
        unsafe {
            device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .context("Failed to reset command buffer")?;
        self.record_command_buffer(cmd, image_index, slot)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Submit
        // ─────────────────────────────────────────────────────────────────────
        let sync = &self.frame_sync[slot];
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], sync.in_flight_fence)
        }
        .context("Failed to submit draw command buffer")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Present, then rebuild if the swapchain went stale
        // ─────────────────────────────────────────────────────────────────────
        let status = self
            .swapchain
            .as_ref()
            .context("Swapchain not initialized")?
            .present(device.present_queue, image_index, &signal_semaphores)?;

        self.frame.advance();

        let resized = self.surface.is_resize_pending();
        if self.surface.take_recreate(status) {
            log::debug!("Recreating swapchain after present ({:?}, resized: {})", status, resized);
            self.recreate_swapchain()?;
        }

        Ok(true)
    }

    fn update_uniform_buffer(&mut self, slot: usize) -> Result<()> {
        let extent = self
            .swapchain
            .as_ref()
            .map(|s| s.extent)
            .context("Swapchain not initialized")?;
        let elapsed = self.start_time.elapsed().as_secs_f32();

        let ubo = UniformBufferObject::animated(&self.config.scene, elapsed, extent);
        self.uniform_buffers[slot].write(bytemuck::bytes_of(&ubo))
    }

    fn record_command_buffer(&self, cmd: vk::CommandBuffer, image_index: u32, slot: usize) -> Result<()> {
        let device = &self.device.device;
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let framebuffer = *self
            .framebuffers
            .get(image_index as usize)
            .context("No framebuffer for acquired image")?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { device.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin recording command buffer")?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.graphics.clear_color,
            },
        }];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: swapchain.extent,
        };

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: swapchain.extent.width as f32,
            height: swapchain.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);

            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, scene::INDEX_TYPE);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[self.descriptor_sets[slot]],
                &[],
            );

            device.cmd_draw_indexed(cmd, QUAD_INDICES.len() as u32, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);
        }

        unsafe { device.end_command_buffer(cmd) }.context("Failed to record command buffer")?;

        Ok(())
    }

    // =========================================================================
    // SWAPCHAIN LIFETIME
    // =========================================================================

    /// Track the window size. Zero area pauses rendering until restored.
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.surface.notify_resized(width, height);
    }

    /// Rebuild the swapchain and everything sized after it.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        let size = self.window.inner_size();
        let extent = swapchain::surface_extent(&self.device, size.width, size.height)?;
        if !self.surface.begin_recreate(extent.width, extent.height) {
            log::debug!("Surface has no area, deferring swapchain recreation");
            return Ok(());
        }

        self.device.wait_idle()?;

        // The surface can only have one swapchain at a time
        pipeline::destroy_framebuffers(&self.device, &mut self.framebuffers);
        self.swapchain = None;

        let swapchain = Swapchain::new(
            self.device.clone(),
            self.config.present_mode(),
            size.width,
            size.height,
        )?;

        if swapchain.format != self.render_pass_format {
            log::info!(
                "Surface format changed {:?} -> {:?}, rebuilding pipeline",
                self.render_pass_format,
                swapchain.format
            );
            self.rebuild_pipeline(swapchain.format)?;
        }

        self.framebuffers = pipeline::create_framebuffers(
            &self.device,
            &swapchain.image_views,
            self.render_pass,
            swapchain.extent,
        )?;
        self.swapchain = Some(swapchain);

        Ok(())
    }

    fn rebuild_pipeline(&mut self, format: vk::Format) -> Result<()> {
        let render_pass = pipeline::create_render_pass(&self.device, format)?;
        let graphics_pipeline = match pipeline::create_graphics_pipeline(
            &self.device,
            render_pass,
            self.descriptor_set_layout,
            &self.config.assets.vertex_shader,
            &self.config.assets.fragment_shader,
        ) {
            Ok(p) => p,
            Err(e) => {
                unsafe { self.device.device.destroy_render_pass(render_pass, None) };
                return Err(e);
            }
        };

        self.pipeline.destroy(&self.device.device);
        unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };

        self.pipeline = graphics_pipeline;
        self.render_pass = render_pass;
        self.render_pass_format = format;
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        let _ = self.device.wait_idle();

        let device = &self.device.device;
        pipeline::destroy_framebuffers(&self.device, &mut self.framebuffers);

        unsafe {
            self.pipeline.destroy(device);
            device.destroy_render_pass(self.render_pass, None);
        }

        self.uniform_buffers.clear();

        unsafe {
            // Also frees the descriptor sets
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);

            for sync in &self.frame_sync {
                sync.destroy(device);
            }

            // Also frees the command buffers
            device.destroy_command_pool(self.command_pool, None);
        }

        // Texture, vertex/index buffers and swapchain drop with their fields.
        // The device goes last, once every Arc clone is gone.
        log::info!("Cleanup complete");
    }
}

/// Raw handles made while `Renderer::new` runs
#[derive(Default)]
struct InitHandles {
    render_pass: vk::RenderPass,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline: GraphicsPipeline,
    framebuffers: Vec<vk::Framebuffer>,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    frame_sync: Vec<FrameSync>,
}

/// Destroys whatever `Renderer::new` created if it bails out half way.
/// Handles not created yet are null, which destroy calls ignore.
struct InitGuard {
    device: Arc<VulkanDevice>,
    handles: InitHandles,
}

impl InitGuard {
    /// Hand the handles over to the renderer
    fn finish(mut self) -> InitHandles {
        std::mem::take(&mut self.handles)
    }
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        let device = &self.device.device;
        let handles = &mut self.handles;

        pipeline::destroy_framebuffers(&self.device, &mut handles.framebuffers);
        handles.pipeline.destroy(device);
        unsafe {
            device.destroy_render_pass(handles.render_pass, None);
            device.destroy_descriptor_pool(handles.descriptor_pool, None);
            device.destroy_descriptor_set_layout(handles.descriptor_set_layout, None);
            for sync in handles.frame_sync.drain(..) {
                sync.destroy(device);
            }
            device.destroy_command_pool(handles.command_pool, None);
        }
    }
}
