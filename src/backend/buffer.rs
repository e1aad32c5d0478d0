// Buffer utilities for vertex, index, and uniform buffers
//
// Memory comes from the device's gpu-allocator instance. Static geometry is
// uploaded once through a staging buffer into GPU-only memory; uniform
// buffers stay host-visible and persistently mapped.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::{commands, VulkanDevice};

/// A Vulkan buffer and the memory bound to it
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for buffer '{}'", name));

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // Construct first so Drop cleans up if binding fails
        let buffer = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device: device.clone(),
        };

        if let Some(allocation) = &buffer.allocation {
            unsafe {
                device
                    .device
                    .bind_buffer_memory(buffer.buffer, allocation.memory(), allocation.offset())
            }
            .with_context(|| format!("Failed to bind memory for buffer '{}'", name))?;
        }

        Ok(buffer)
    }

    /// Copy bytes to the start of a host-visible buffer
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            anyhow::bail!(
                "Write of {} bytes exceeds buffer size of {} bytes",
                bytes.len(),
                self.size
            );
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };

        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}

/// Size in bytes of a slice of `T`
pub fn byte_size<T>(data: &[T]) -> vk::DeviceSize {
    std::mem::size_of_val(data) as vk::DeviceSize
}

/// Upload `data` through a staging buffer into GPU-only memory
pub fn create_device_local_buffer<T: bytemuck::Pod>(
    device: &Arc<VulkanDevice>,
    command_pool: vk::CommandPool,
    name: &str,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<Buffer> {
    let size = byte_size(data);
    if size == 0 {
        anyhow::bail!("Refusing to create empty buffer '{}'", name);
    }

    let mut staging = Buffer::new(
        device,
        &format!("{} staging", name),
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;
    staging.write(bytemuck::cast_slice(data))?;

    let buffer = Buffer::new(
        device,
        name,
        size,
        vk::BufferUsageFlags::TRANSFER_DST | usage,
        MemoryLocation::GpuOnly,
    )?;

    commands::copy_buffer(device, command_pool, staging.buffer, buffer.buffer, size)?;

    log::debug!("Uploaded {} bytes to '{}'", size, name);
    Ok(buffer)
}

/// One mapped uniform buffer per frame in flight
pub fn create_uniform_buffers(
    device: &Arc<VulkanDevice>,
    count: usize,
    size: vk::DeviceSize,
) -> Result<Vec<Buffer>> {
    (0..count)
        .map(|i| {
            Buffer::new(
                device,
                &format!("uniform buffer {}", i),
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Vertex, QUAD_INDICES, QUAD_VERTICES};

    #[test]
    fn byte_size_counts_every_element() {
        assert_eq!(byte_size(&QUAD_INDICES), 12);
        assert_eq!(
            byte_size(&QUAD_VERTICES),
            (4 * std::mem::size_of::<Vertex>()) as vk::DeviceSize
        );
        assert_eq!(byte_size::<u32>(&[]), 0);
    }
}
