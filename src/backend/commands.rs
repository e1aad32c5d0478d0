// Command pool and one-shot command helpers
//
// Transfers (staging copies, image layout transitions) are recorded into a
// throwaway command buffer, submitted, and waited on right away.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

pub fn create_command_pool(device: &VulkanDevice, queue_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(queue_family)
        // Per-frame buffers are reset individually before re-recording
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")
}

/// One primary command buffer per frame in flight
pub fn allocate_command_buffers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffers")
}

pub fn begin_single_time_commands(
    device: &VulkanDevice,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer> {
    let command_buffer = allocate_command_buffers(device, pool, 1)?[0];

    let begin_info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    if let Err(e) = unsafe { device.device.begin_command_buffer(command_buffer, &begin_info) } {
        unsafe { device.device.free_command_buffers(pool, &[command_buffer]) };
        return Err(e).context("Failed to begin one-shot command buffer");
    }

    Ok(command_buffer)
}

/// Submit, wait for the graphics queue to drain, free the buffer
pub fn end_single_time_commands(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    let command_buffers = [command_buffer];

    let result = unsafe {
        device
            .device
            .end_command_buffer(command_buffer)
            .context("Failed to end one-shot command buffer")
            .and_then(|_| {
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                device
                    .device
                    .queue_submit(device.graphics_queue, &[submit_info.build()], vk::Fence::null())
                    .context("Failed to submit one-shot command buffer")
            })
            .and_then(|_| {
                device
                    .device
                    .queue_wait_idle(device.graphics_queue)
                    .context("Failed to wait for graphics queue")
            })
    };

    unsafe { device.device.free_command_buffers(pool, &command_buffers) };
    result
}

/// Record with `record`, then submit and wait
pub fn run_single_time_commands<F>(device: &VulkanDevice, pool: vk::CommandPool, record: F) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let command_buffer = begin_single_time_commands(device, pool)?;
    record(&device.device, command_buffer);
    end_single_time_commands(device, pool, command_buffer)
}

pub fn copy_buffer(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    run_single_time_commands(device, pool, |d, cmd| {
        let region = vk::BufferCopy::builder().size(size).build();
        unsafe { d.cmd_copy_buffer(cmd, src, dst, &[region]) };
    })
}

/// Copy tightly packed pixels into an image in TRANSFER_DST_OPTIMAL layout
pub fn copy_buffer_to_image(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) -> Result<()> {
    run_single_time_commands(device, pool, |d, cmd| {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D { width, height, depth: 1 })
            .build();

        unsafe {
            d.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    })
}
