use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use color_eyre::eyre::{eyre, OptionExt, Result};
use crate::renderer::contexts::resource_ctx::allocator::{check_range, RawBuffer, ResourceAllocator};
use crate::renderer::error::ResourceError;
use crate::renderer::resources::create_info::MemoryClass;

/// One item of a [`GpuBufferPool`]: a region of the shared buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolItem {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub size: u64,
}

impl PoolItem {
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(self.offset)
            .range(self.size)
    }
}

/// `count` equally sized items carved out of a single buffer and allocation.
///
/// Responsibilities:
/// - Rounds the item stride up to the requested alignment so every item can be bound on its
///   own, e.g. one uniform block per frame in flight
/// - Host-visible pools share one mapping and are written per item in place
/// - Frees the whole allocation at once, after the allocator's queue went idle
pub struct GpuBufferPool {
    raw: Option<RawBuffer>,
    count: u64,
    stride: u64,
    item_size: u64,
    alignment: u64,
    name: String,
    allocator: Arc<ResourceAllocator>,
}

impl GpuBufferPool {
    pub fn new(
        allocator: Arc<ResourceAllocator>,
        count: u64,
        stride: u64,
        alignment: u64,
        usage: vk::BufferUsageFlags,
        memory_class: MemoryClass,
        name: &str,
    ) -> Result<Self> {
        if count == 0 || stride == 0 {
            return Err(ResourceError::EmptyBuffer.into());
        }
        if usage.is_empty() {
            return Err(ResourceError::InvalidUsage("a buffer pool needs usage flags").into());
        }

        let alignment = alignment.max(1);
        let item_size = aligned_stride(stride, alignment)?;
        let size = item_size
            .checked_mul(count)
            .ok_or_eyre("buffer pool size overflows u64")?;
        let raw = allocator.create_buffer(None, size, usage, memory_class, name)?;

        log::debug!(
            "Buffer pool `{}`: {} items of {} bytes every {} bytes",
            name,
            count,
            stride,
            item_size,
        );
        Ok(Self {
            raw: Some(raw),
            count,
            stride,
            item_size,
            alignment,
            name: name.to_owned(),
            allocator,
        })
    }

    /// Uniform buffer pool aligned to the device's minimum uniform offset alignment
    pub fn uniform(
        allocator: Arc<ResourceAllocator>,
        count: u64,
        stride: u64,
        memory_class: MemoryClass,
        name: &str,
    ) -> Result<Self> {
        let alignment = allocator
            .device()
            .properties
            .limits
            .min_uniform_buffer_offset_alignment;
        Self::new(
            allocator,
            count,
            stride,
            alignment,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            memory_class,
            name,
        )
    }

    /// `None` when `index` is past the last item
    pub fn item(&self, index: u64) -> Option<PoolItem> {
        let raw = self.raw.as_ref()?;
        (index < self.count).then(|| PoolItem {
            buffer: raw.handle,
            offset: index * self.item_size,
            size: self.stride,
        })
    }

    /// Writes `bytes` at `offset` inside item `index`. Host-visible pools only
    pub fn write(&mut self, index: u64, offset: u64, bytes: &[u8]) -> Result<()> {
        let item_offset = self.item_offset(index)?;
        check_range(offset, bytes.len() as u64, self.stride)?;
        let raw = self.raw.as_mut().ok_or_eyre("buffer pool was released")?;
        self.allocator.write_buffer(raw, item_offset + offset, bytes)
    }

    pub fn write_pod<T: Pod>(&mut self, index: u64, value: &T) -> Result<()> {
        self.write(index, 0, bytemuck::bytes_of(value))
    }

    /// The `stride` bytes of item `index`
    pub fn read(&self, index: u64) -> Result<Vec<u8>> {
        let start = self.item_offset(index)? as usize;
        let raw = self.raw.as_ref().ok_or_eyre("buffer pool was released")?;
        let bytes = self.allocator.read_buffer(raw)?;
        bytes
            .get(start..start + self.stride as usize)
            .map(<[u8]>::to_vec)
            .ok_or_eyre("buffer pool is smaller than its items")
    }

    pub fn handle(&self) -> vk::Buffer {
        self.raw.as_ref().map_or(vk::Buffer::null(), |raw| raw.handle)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Bytes of payload per item
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Distance between the starts of two items
    pub fn item_size(&self) -> u64 {
        self.item_size
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn size(&self) -> u64 {
        self.raw.as_ref().map_or(0, |raw| raw.size)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn item_offset(&self, index: u64) -> Result<u64> {
        if index >= self.count {
            return Err(eyre!(
                "item {} is out of range for pool `{}` of {} items",
                index,
                self.name,
                self.count
            ));
        }
        Ok(index * self.item_size)
    }
}

impl Drop for GpuBufferPool {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.wait_idle() {
            log::error!("Failed to wait for idle before releasing pool `{}`: {}", self.name, e);
        }
        if let Some(mut raw) = self.raw.take() {
            self.allocator.destroy_buffer(&mut raw);
        }
    }
}

/// `stride` rounded up to the next multiple of `alignment`
pub fn aligned_stride(stride: u64, alignment: u64) -> Result<u64> {
    stride
        .checked_next_multiple_of(alignment.max(1))
        .ok_or_eyre("aligned stride overflows u64")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_stride() {
        assert_eq!(aligned_stride(100, 256).unwrap(), 256);
        assert_eq!(aligned_stride(256, 256).unwrap(), 256);
        assert_eq!(aligned_stride(257, 256).unwrap(), 512);
        assert_eq!(aligned_stride(12, 0).unwrap(), 12);
        assert!(aligned_stride(u64::MAX, 256).is_err());
    }

    #[test]
    fn test_item_offsets_are_aligned() {
        for alignment in [1u64, 4, 16, 64, 256] {
            for stride in [1u64, 17, 64, 72, 200] {
                let item_size = aligned_stride(stride, alignment).unwrap();
                assert!(item_size >= stride);
                assert!(item_size - stride < alignment);
                for index in 0..8 {
                    assert_eq!((index * item_size) % alignment, 0);
                }
            }
        }
    }

    #[test]
    fn test_descriptor_info_covers_one_item() {
        let item = PoolItem {
            buffer: vk::Buffer::null(),
            offset: 512,
            size: 72,
        };
        let info = item.descriptor_info();
        assert_eq!((info.offset, info.range), (512, 72));
    }
}
