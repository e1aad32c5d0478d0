// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The selection helpers are pure so they can be checked without a GPU.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// What the surface can do for a given physical device
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        surface_loader: &khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .context("Failed to query surface capabilities")?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .context("Failed to query surface formats")?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .context("Failed to query surface present modes")?,
            })
        }
    }

    /// At least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise take whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO is the only mode every implementation must support.
pub fn choose_present_mode(
    preferred: vk::PresentModeKHR,
    available: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// A current extent of u32::MAX means the window manager lets us pick.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Extent a swapchain created right now would get. Some platforms report
/// 0x0 while the window is minimized, even though the window has a size.
pub fn surface_extent(device: &VulkanDevice, width: u32, height: u32) -> Result<vk::Extent2D> {
    let caps = unsafe {
        device
            .surface_loader
            .get_physical_device_surface_capabilities(device.physical_device, device.surface)
    }
    .context("Failed to query surface capabilities")?;

    Ok(choose_extent(&caps, width, height))
}

/// One more than the minimum, max_image_count of 0 means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

/// Result of asking the swapchain for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredImage {
    Ready { index: u32, suboptimal: bool },
    OutOfDate,
}

impl AcquiredImage {
    pub fn classify(result: VkResult<(u32, bool)>) -> Result<Self> {
        match result {
            Ok((index, suboptimal)) => Ok(Self::Ready { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }
}

/// State of the swapchain as reported by presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl SwapchainStatus {
    pub fn classify_present(result: VkResult<bool>) -> Result<Self> {
        match result {
            Ok(false) => Ok(Self::Optimal),
            Ok(true) => Ok(Self::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

/// The driver doesn't always report a resize, so the window flag counts too.
pub fn needs_recreate(status: SwapchainStatus, framebuffer_resized: bool) -> bool {
    framebuffer_resized || status != SwapchainStatus::Optimal
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        preferred_present_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let support =
            SwapchainSupport::query(&device.surface_loader, device.physical_device, device.surface)?;

        let surface_format =
            choose_surface_format(&support.formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(preferred_present_mode, &support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);

        if extent.width == 0 || extent.height == 0 {
            anyhow::bail!("Cannot create a swapchain for a zero-area surface");
        }

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        let families = device.queue_families;
        let family_indices = [families.graphics, families.present];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // Images are shared between queues only when the families differ
        create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let image_views = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")
            .and_then(|images| {
                log::info!("Created swapchain with {} images", images.len());
                super::create_all(
                    images,
                    |image| super::texture::create_image_view(&device, image, surface_format.format),
                    |view| unsafe { device.device.destroy_image_view(view, None) },
                )
            });

        let image_views = match image_views {
            Ok(views) => views,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        Ok(Self {
            swapchain,
            swapchain_loader,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Acquire next image for rendering, signalling `semaphore` once it is usable
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquiredImage> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        AcquiredImage::classify(result)
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<SwapchainStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        SwapchainStatus::classify_present(result)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn prefers_bgra_srgb_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::MAILBOX, &available),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::IMMEDIATE, &available),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn current_extent_wins_when_defined() {
        let caps = caps((1024, 768), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, 800, 600);
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn minimized_surface_reports_zero_extent() {
        // Window still reports its last size, the surface says 0x0
        let caps = caps((0, 0), (0, 0), (4096, 4096));
        let extent = choose_extent(&caps, 800, 600);
        assert_eq!((extent.width, extent.height), (0, 0));
    }

    #[test]
    fn window_size_is_clamped_when_extent_is_undefined() {
        let caps = caps((u32::MAX, u32::MAX), (200, 100), (1920, 1080));
        let extent = choose_extent(&caps, 4000, 50);
        assert_eq!((extent.width, extent.height), (1920, 100));

        let extent = choose_extent(&caps, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn adequate_support_needs_formats_and_modes() {
        let mut support = SwapchainSupport {
            capabilities: Default::default(),
            formats: vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![],
        };
        assert!(!support.is_adequate());
        support.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(support.is_adequate());
    }

    #[test]
    fn acquire_results_are_classified() {
        assert_eq!(
            AcquiredImage::classify(Ok((2, false))).unwrap(),
            AcquiredImage::Ready { index: 2, suboptimal: false }
        );
        assert_eq!(
            AcquiredImage::classify(Ok((0, true))).unwrap(),
            AcquiredImage::Ready { index: 0, suboptimal: true }
        );
        assert_eq!(
            AcquiredImage::classify(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquiredImage::OutOfDate
        );
        assert!(AcquiredImage::classify(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn present_results_are_classified() {
        assert_eq!(SwapchainStatus::classify_present(Ok(false)).unwrap(), SwapchainStatus::Optimal);
        assert_eq!(SwapchainStatus::classify_present(Ok(true)).unwrap(), SwapchainStatus::Suboptimal);
        assert_eq!(
            SwapchainStatus::classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            SwapchainStatus::OutOfDate
        );
        assert!(SwapchainStatus::classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn recreate_on_resize_or_stale_swapchain() {
        assert!(!needs_recreate(SwapchainStatus::Optimal, false));
        assert!(needs_recreate(SwapchainStatus::Optimal, true));
        assert!(needs_recreate(SwapchainStatus::Suboptimal, false));
        assert!(needs_recreate(SwapchainStatus::OutOfDate, false));
    }
}
