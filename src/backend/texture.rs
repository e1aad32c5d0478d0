// Textures - sampled images
//
// Loads an image file, uploads it into an optimal-tiling GPU image through a
// staging buffer, and wraps it with a view and a sampler for the fragment shader.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::path::Path;
use std::sync::Arc;

use super::buffer::Buffer;
use super::{commands, VulkanDevice};

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Decoded pixels, always 4 bytes per texel
#[derive(Debug, Clone)]
pub struct ImageData {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ImageData {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to load texture image: {:?}", path))?;
        let data = Self::from_bytes(&bytes)
            .with_context(|| format!("Failed to load texture image: {:?}", path))?;

        log::info!("Loaded texture {}x{} from {:?}", data.width, data.height, path);
        Ok(data)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).context("Failed to decode texture image")?;
        Ok(Self::from_rgba(img.to_rgba8()))
    }

    fn from_rgba(rgba: image::RgbaImage) -> Self {
        let (width, height) = rgba.dimensions();
        Self {
            pixels: rgba.into_raw(),
            width,
            height,
        }
    }

    pub fn size_bytes(&self) -> vk::DeviceSize {
        self.pixels.len() as vk::DeviceSize
    }
}

/// Access masks and pipeline stages for a layout transition barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Only the two transitions a texture upload needs are supported.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => anyhow::bail!("Unsupported layout transition: {:?} -> {:?}", old, new),
    }
}

pub fn transition_image_layout(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let masks = transition_masks(old_layout, new_layout)?;

    commands::run_single_time_commands(device, pool, |d, cmd| {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access)
            .build();

        unsafe {
            d.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            )
        };
    })
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// 2D color view over a single-mip, single-layer image
pub fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(color_subresource_range());

    unsafe { device.device.create_image_view(&create_info, None) }
        .context("Failed to create image view")
}

fn create_sampler(device: &VulkanDevice, anisotropy: bool) -> Result<vk::Sampler> {
    let max_anisotropy = device.properties.limits.max_sampler_anisotropy;

    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy)
        .max_anisotropy(if anisotropy { max_anisotropy } else { 1.0 })
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    unsafe { device.device.create_sampler(&sampler_info, None) }
        .context("Failed to create texture sampler")
}

/// Sampled texture: image, memory, view and sampler
pub struct Texture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Texture {
    pub fn from_file(
        device: &Arc<VulkanDevice>,
        command_pool: vk::CommandPool,
        path: &Path,
        anisotropy: bool,
    ) -> Result<Self> {
        let data = ImageData::from_file(path)?;
        Self::from_image_data(device, command_pool, &data, anisotropy)
    }

    pub fn from_image_data(
        device: &Arc<VulkanDevice>,
        command_pool: vk::CommandPool,
        data: &ImageData,
        anisotropy: bool,
    ) -> Result<Self> {
        let mut staging = Buffer::new(
            device,
            "texture staging",
            data.size_bytes(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(&data.pixels)?;

        let mut texture = Self::allocate_image(device, data.width, data.height)?;

        transition_image_layout(
            device,
            command_pool,
            texture.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        commands::copy_buffer_to_image(
            device,
            command_pool,
            staging.buffer,
            texture.image,
            data.width,
            data.height,
        )?;
        transition_image_layout(
            device,
            command_pool,
            texture.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        texture.view = create_image_view(device, texture.image, TEXTURE_FORMAT)?;
        texture.sampler = create_sampler(device, anisotropy)?;

        Ok(texture)
    }

    /// Image plus bound GPU-only memory; view and sampler come later
    fn allocate_image(device: &Arc<VulkanDevice>, width: u32, height: u32) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(TEXTURE_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create texture image")?;

        let mut texture = Self {
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            allocation: None,
            device: device.clone(),
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = device
            .allocator()
            .allocate(&AllocationCreateDesc {
                name: "texture image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate texture image memory")?;
        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());
        texture.allocation = Some(allocation);

        unsafe { device.device.bind_image_memory(image, memory, offset) }
            .context("Failed to bind texture image memory")?;

        Ok(texture)
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free texture memory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn upload_transitions_have_expected_masks() {
        let to_transfer =
            transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .unwrap();
        assert_eq!(to_transfer.src_access, vk::AccessFlags::empty());
        assert_eq!(to_transfer.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_transfer.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_transfer.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_shader = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_shader.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_shader.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_shader.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn other_transitions_are_rejected() {
        let err = transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unsupported layout transition"));
    }

    #[test]
    fn decodes_png_to_rgba() {
        // 2x1 RGB image, alpha gets filled in on conversion
        let rgb = image::RgbImage::from_raw(2, 1, vec![255, 0, 0, 0, 0, 255]).unwrap();
        let mut png = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let data = ImageData::from_bytes(&png).unwrap();
        assert_eq!((data.width, data.height), (2, 1));
        assert_eq!(data.pixels, vec![255, 0, 0, 255, 0, 0, 255, 255]);
        assert_eq!(data.size_bytes(), 8);
    }

    #[test]
    fn missing_texture_names_the_path() {
        let err = ImageData::from_file(Path::new("missing/vox.png")).unwrap_err();
        assert!(format!("{:#}", err).contains("vox.png"));
    }

    #[test]
    fn bundled_texture_loads_from_disk() {
        let data = ImageData::from_file(Path::new("resources/textures/vox.png")).unwrap();
        assert_eq!((data.width, data.height), (256, 256));
        assert_eq!(data.size_bytes(), 256 * 256 * 4);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(ImageData::from_bytes(b"not an image").is_err());
    }
}
