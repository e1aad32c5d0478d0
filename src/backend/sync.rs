// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// Each frame in flight owns its own set so the CPU can record frame N+1
// while the GPU still works on frame N.

use anyhow::{Context, Result};
use ash::vk;

use super::swapchain::{self, SwapchainStatus};
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    /// Signalled by the presentation engine once the acquired image is free
    pub image_available: vk::Semaphore,
    /// Signalled by the graphics queue, presentation waits on it
    pub render_finished: vk::Semaphore,
    /// Lets the CPU wait until the GPU is done with this slot
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        // Null handles are ignored by destroy, so a partial set cleans up as a whole
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
        };

        match sync.create_handles(&device.device) {
            Ok(()) => Ok(sync),
            Err(e) => {
                sync.destroy(&device.device);
                Err(e)
            }
        }
    }

    fn create_handles(&mut self, device: &ash::Device) -> Result<()> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled, the first wait of every slot would block forever otherwise
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            self.image_available = device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;
            self.render_finished = device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create render-finished semaphore")?;
            self.in_flight_fence = device
                .create_fence(&fence_info, None)
                .context("Failed to create in-flight fence")?;
        }
        Ok(())
    }

    /// Block until the GPU finished the last submission that used this slot
    pub fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }
            .context("Failed to wait for in-flight fence")
    }

    /// Back to unsignaled, only once we're sure work will be submitted
    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }
            .context("Failed to reset in-flight fence")
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Which frame-in-flight slot is being recorded
#[derive(Debug, Clone, Copy)]
pub struct FrameCursor {
    current: usize,
    frames_in_flight: usize,
}

impl FrameCursor {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            current: 0,
            frames_in_flight: frames_in_flight.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }
}

/// Window-size bookkeeping that decides when to draw and when the
/// swapchain has to be rebuilt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceState {
    /// Zero-area window or surface, nothing can be presented
    is_minimized: bool,
    /// Window reported a new size, the driver may not tell us itself
    framebuffer_resized: bool,
}

impl SurfaceState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            is_minimized: is_empty(width, height),
            framebuffer_resized: false,
        }
    }

    /// Track a window resize. A zero-area size only pauses drawing.
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.is_minimized = is_empty(width, height);
        if !self.is_minimized {
            self.framebuffer_resized = true;
        }
    }

    pub fn should_draw(&self) -> bool {
        !self.is_minimized
    }

    pub fn is_resize_pending(&self) -> bool {
        self.framebuffer_resized
    }

    /// Whether presentation (or a pending resize) calls for a new swapchain.
    /// Clears the resize flag when it does.
    pub fn take_recreate(&mut self, status: SwapchainStatus) -> bool {
        let recreate = swapchain::needs_recreate(status, self.framebuffer_resized);
        if recreate {
            self.framebuffer_resized = false;
        }
        recreate
    }

    /// Called with the extent a new swapchain would get. A zero extent defers
    /// recreation and pauses drawing until the next resize.
    pub fn begin_recreate(&mut self, width: u32, height: u32) -> bool {
        if is_empty(width, height) {
            self.is_minimized = true;
            return false;
        }
        self.is_minimized = false;
        self.framebuffer_resized = false;
        true
    }
}

fn is_empty(width: u32, height: u32) -> bool {
    width == 0 || height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_around() {
        let mut cursor = FrameCursor::new(2);
        assert_eq!(cursor.current(), 0);
        cursor.advance();
        assert_eq!(cursor.current(), 1);
        cursor.advance();
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn cursor_visits_every_slot() {
        let mut cursor = FrameCursor::new(3);
        let visited: Vec<usize> = (0..7)
            .map(|_| {
                let slot = cursor.current();
                cursor.advance();
                slot
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn single_slot_cursor_stays_put() {
        let mut cursor = FrameCursor::new(0);
        cursor.advance();
        assert_eq!(cursor.current(), 0);
        cursor.advance();
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn zero_area_window_starts_paused() {
        assert!(!SurfaceState::new(800, 0).should_draw());
        assert!(!SurfaceState::new(0, 600).should_draw());
        assert!(SurfaceState::new(800, 600).should_draw());
    }

    #[test]
    fn minimizing_pauses_without_flagging_a_resize() {
        let mut state = SurfaceState::new(800, 600);
        state.notify_resized(0, 600);

        assert!(!state.should_draw());
        assert!(!state.is_resize_pending());
    }

    #[test]
    fn resize_flag_forces_recreate_once() {
        let mut state = SurfaceState::new(800, 600);
        state.notify_resized(1024, 768);
        assert!(state.should_draw());
        assert!(state.is_resize_pending());

        assert!(state.take_recreate(SwapchainStatus::Optimal));
        assert!(!state.is_resize_pending());
        assert!(!state.take_recreate(SwapchainStatus::Optimal));
    }

    #[test]
    fn stale_swapchain_recreates_without_a_resize() {
        let mut state = SurfaceState::new(800, 600);
        assert!(state.take_recreate(SwapchainStatus::Suboptimal));
        assert!(state.take_recreate(SwapchainStatus::OutOfDate));
        assert!(!state.take_recreate(SwapchainStatus::Optimal));
    }

    #[test]
    fn recreate_is_deferred_while_the_surface_has_no_area() {
        let mut state = SurfaceState::new(800, 600);
        state.notify_resized(1024, 768);

        // Window still reports a size, but the surface extent is 0x0
        assert!(!state.begin_recreate(0, 0));
        assert!(!state.should_draw());
        assert!(state.is_resize_pending());
    }

    #[test]
    fn minimize_restore_recreate_cycle() {
        let mut state = SurfaceState::new(800, 600);

        state.notify_resized(0, 0);
        assert!(!state.should_draw());

        state.notify_resized(800, 600);
        assert!(state.should_draw());
        assert!(state.is_resize_pending());

        assert!(state.begin_recreate(800, 600));
        assert!(state.should_draw());
        assert!(!state.is_resize_pending());
        assert!(!state.take_recreate(SwapchainStatus::Optimal));
    }
}
