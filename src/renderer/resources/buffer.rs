use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use color_eyre::eyre::{OptionExt, Result};
use crate::renderer::contexts::resource_ctx::allocator::{RawBuffer, ResourceAllocator};
use crate::renderer::resources::create_info::{MemoryClass, ResourceCreateInfo, ResourceKind};

/// Buffer handle tied to the allocator that created it.
///
/// Starts empty; every upload replaces the previous contents by destroying the old buffer
/// first, so nothing is double-buffered here.
pub struct GpuBuffer {
    raw: Option<RawBuffer>,
    count: u64,
    stride: u64,
    name: String,
    allocator: Arc<ResourceAllocator>,
}

impl GpuBuffer {
    pub fn new(allocator: Arc<ResourceAllocator>) -> Self {
        Self {
            raw: None,
            count: 0,
            stride: 0,
            name: "buffer".into(),
            allocator,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Creates a byte buffer described by `info`, uploading its payload if it has one
    pub fn from_info(allocator: Arc<ResourceAllocator>, info: &ResourceCreateInfo) -> Result<Self> {
        assert_eq!(info.kind(), ResourceKind::Buffer, "`{}` does not describe a buffer", info.name());
        let mut buffer = Self::new(allocator).with_name(info.name());
        buffer.data_raw(
            info.layer_data().first().copied(),
            info.size(),
            1,
            info.buffer_usage(),
            info.memory_class(),
        )?;
        Ok(buffer)
    }

    /// Uploads `items`, one element per item
    pub fn data<T: Pod>(
        &mut self,
        items: &[T],
        usage: vk::BufferUsageFlags,
        memory_class: MemoryClass,
    ) -> Result<()> {
        self.data_raw(
            Some(bytemuck::cast_slice(items)),
            items.len() as u64,
            size_of::<T>() as u64,
            usage,
            memory_class,
        )
    }

    /// Replaces the buffer with `count * stride` bytes. `None` zero-fills
    pub fn data_raw(
        &mut self,
        bytes: Option<&[u8]>,
        count: u64,
        stride: u64,
        usage: vk::BufferUsageFlags,
        memory_class: MemoryClass,
    ) -> Result<()> {
        self.clear()?;

        let size = byte_size(count, stride)?;
        let raw = self
            .allocator
            .create_buffer(bytes, size, usage, memory_class, &self.name)?;

        self.raw = Some(raw);
        self.count = count;
        self.stride = stride;
        Ok(())
    }

    /// Waits for the queue to go idle, then frees the buffer
    pub fn clear(&mut self) -> Result<()> {
        if self.raw.is_some() {
            self.allocator.wait_idle()?;
        }
        if let Some(mut raw) = self.raw.take() {
            self.allocator.destroy_buffer(&mut raw);
        }
        self.count = 0;
        self.stride = 0;
        Ok(())
    }

    /// Writes into a host-visible buffer in place
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let raw = self.raw.as_mut().ok_or_eyre("buffer holds no data")?;
        self.allocator.write_buffer(raw, offset, bytes)
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        let raw = self.raw.as_ref().ok_or_eyre("buffer holds no data")?;
        self.allocator.read_buffer(raw)
    }

    /// `vk::Buffer::null()` until data has been uploaded
    pub fn handle(&self) -> vk::Buffer {
        self.raw.as_ref().map_or(vk::Buffer::null(), |raw| raw.handle)
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn size(&self) -> u64 {
        self.raw.as_ref().map_or(0, |raw| raw.size)
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.raw.as_ref().map_or(vk::BufferUsageFlags::empty(), |raw| raw.usage)
    }

    pub fn memory_class(&self) -> Option<MemoryClass> {
        self.raw.as_ref().map(|raw| raw.memory_class)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.clear() {
            log::error!("Failed to release buffer `{}`: {}", self.name, e);
            if let Some(mut raw) = self.raw.take() {
                self.allocator.destroy_buffer(&mut raw);
            }
        }
    }
}

fn byte_size(count: u64, stride: u64) -> Result<u64> {
    count.checked_mul(stride).ok_or_eyre("buffer size overflows u64")
}
