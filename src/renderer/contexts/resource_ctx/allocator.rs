use std::sync::{Arc, Mutex, MutexGuard};
use ash::vk;
use color_eyre::eyre::{eyre, Result};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationSizes, AllocatorDebugSettings, MemoryLocation};
use smallvec::SmallVec;
use crate::renderer::contexts::device_ctx::command_executor::CommandExecutor;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::resource_ctx::format;
use crate::renderer::contexts::resource_ctx::layout::LayoutTransition;
use crate::renderer::contexts::resource_ctx::mip;
use crate::renderer::error::{DriverResultExt, ResourceError};
use crate::renderer::resources::create_info::{MemoryClass, SamplerInfo};

/// A buffer and its memory. Hand it back to [`ResourceAllocator::destroy_buffer`] when done
#[derive(Debug)]
pub struct RawBuffer {
    pub handle: vk::Buffer,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub memory_class: MemoryClass,
    allocation: Option<Allocation>,
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if self.allocation.is_some() {
            log::warn!("Buffer {:?} dropped without being returned to the allocator", self.handle);
        }
    }
}

/// Parameters of a device-local image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent3D,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub mip_levels: u32,
    pub layer_count: u32,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
}

impl ImageDesc {
    fn create_info(&self) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .flags(self.flags)
            .image_type(self.image_type)
            .format(self.format)
            .extent(self.extent)
            .mip_levels(self.mip_levels)
            .array_layers(self.layer_count)
            .samples(self.samples)
            .tiling(self.tiling)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }
}

/// An image and its memory, without a view. Hand it back to [`ResourceAllocator::destroy_image`]
pub struct RawImage {
    pub handle: vk::Image,
    pub desc: ImageDesc,
    allocation: Option<Allocation>,
}

impl Drop for RawImage {
    fn drop(&mut self) {
        if self.allocation.is_some() {
            log::warn!("Image {:?} dropped without being returned to the allocator", self.handle);
        }
    }
}

/// Sole owner of device memory.
///
/// Every operation that records commands submits them on the graphics queue and blocks
/// until they have executed, so a returned resource is ready for use.
pub struct ResourceAllocator {
    memory_allocator: Arc<Mutex<Allocator>>,
    executor: CommandExecutor,
    device: Arc<RenderDevice>,
}

impl ResourceAllocator {
    pub fn new(device: Arc<RenderDevice>) -> Result<Self> {
        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: device.instance().instance.clone(),
            device: device.logical.clone(),
            physical_device: device.physical,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        })
            .map_err(|source| ResourceError::Allocation {
                name: "device memory allocator".into(),
                source,
            })?;

        // Blits need a graphics queue, so transfers go there as well
        let executor = CommandExecutor::new(device.clone(), device.graphics_queue().clone())?;

        Ok(Self {
            memory_allocator: Arc::new(Mutex::new(memory_allocator)),
            executor,
            device,
        })
    }

    pub fn device(&self) -> &Arc<RenderDevice> {
        &self.device
    }

    /// Blocks until the queue used for transfers has no pending work
    pub fn wait_idle(&self) -> Result<()> {
        self.executor.queue().wait_idle(&self.device.logical)
    }

    /// Creates a buffer of `size` bytes holding `data`.
    ///
    /// Host-visible buffers are mapped and written directly, zero-filled when `data` is `None`.
    /// Device-local buffers are filled through a transient staging buffer and a copy command.
    pub fn create_buffer(
        &self,
        data: Option<&[u8]>,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_class: MemoryClass,
        name: &str,
    ) -> Result<RawBuffer> {
        if size == 0 {
            return Err(ResourceError::EmptyBuffer.into());
        }
        if let Some(data) = data {
            if data.len() as u64 != size {
                return Err(ResourceError::DataSizeMismatch {
                    expected: size,
                    got: data.len() as u64,
                }
                    .into());
            }
        }

        match memory_class {
            MemoryClass::HostVisible => {
                let mut buffer = StagingBuffer::new(self, size, usage, MemoryLocation::CpuToGpu, name)?;
                match data {
                    Some(data) => buffer.write(data)?,
                    None => buffer.zero()?,
                }
                Ok(buffer.release())
            }
            MemoryClass::DeviceLocal => {
                let mut buffer = StagingBuffer::new(
                    self,
                    size,
                    usage | vk::BufferUsageFlags::TRANSFER_DST,
                    MemoryLocation::GpuOnly,
                    name,
                )?;
                let dst = buffer.handle();

                match data {
                    Some(data) => {
                        let mut staging = StagingBuffer::new(
                            self,
                            size,
                            vk::BufferUsageFlags::TRANSFER_SRC,
                            MemoryLocation::CpuToGpu,
                            &format!("{} (staging)", name),
                        )?;
                        staging.write(data)?;
                        let src = staging.handle();

                        self.executor.execute(|cmd, device| {
                            let region = vk::BufferCopy::default().size(size);
                            unsafe {
                                device.cmd_copy_buffer(cmd, src, dst, &[region]);
                            }
                            Ok(())
                        })?;
                    }
                    None => {
                        self.executor.execute(|cmd, device| {
                            unsafe {
                                device.cmd_fill_buffer(cmd, dst, 0, vk::WHOLE_SIZE, 0);
                            }
                            Ok(())
                        })?;
                    }
                }

                log::debug!("Uploaded {} bytes into device-local buffer `{}`", size, name);
                Ok(buffer.release())
            }
        }
    }

    /// Writes into a host-visible buffer at `offset`
    pub fn write_buffer(
        &self,
        buffer: &mut RawBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        if buffer.memory_class != MemoryClass::HostVisible {
            return Err(ResourceError::NotHostVisible.into());
        }
        check_range(offset, data.len() as u64, buffer.size)?;
        write_mapped(buffer, offset as usize, data)
    }

    /// Copies the contents of `buffer` back to the host.
    ///
    /// Device-local buffers need `TRANSFER_SRC` usage, they are copied through a readback buffer.
    pub fn read_buffer(&self, buffer: &RawBuffer) -> Result<Vec<u8>> {
        match buffer.memory_class {
            MemoryClass::HostVisible => Ok(mapped_bytes(buffer)?.to_vec()),
            MemoryClass::DeviceLocal => {
                if !buffer.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
                    return Err(ResourceError::InvalidUsage(
                        "reading a device-local buffer requires TRANSFER_SRC usage",
                    )
                        .into());
                }
                let readback = StagingBuffer::new(
                    self,
                    buffer.size,
                    vk::BufferUsageFlags::TRANSFER_DST,
                    MemoryLocation::GpuToCpu,
                    "buffer readback",
                )?;
                let (src, dst, size) = (buffer.handle, readback.handle(), buffer.size);

                self.executor.execute(|cmd, device| {
                    let before = vk::BufferMemoryBarrier::default()
                        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
                        .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(src)
                        .size(vk::WHOLE_SIZE);
                    unsafe {
                        device.cmd_pipeline_barrier(
                            cmd,
                            vk::PipelineStageFlags::ALL_COMMANDS,
                            vk::PipelineStageFlags::TRANSFER,
                            vk::DependencyFlags::empty(),
                            &[],
                            &[before],
                            &[],
                        );
                        device.cmd_copy_buffer(cmd, src, dst, &[vk::BufferCopy::default().size(size)]);
                    }
                    record_host_read_barrier(device, cmd, dst);
                    Ok(())
                })?;

                readback.read()
            }
        }
    }

    pub fn destroy_buffer(&self, buffer: &mut RawBuffer) {
        let Some(allocation) = buffer.allocation.take() else {
            return;
        };
        self.free(allocation);
        unsafe {
            self.device.logical.destroy_buffer(buffer.handle, None);
        }
        buffer.handle = vk::Buffer::null();
    }

    /// Allocates device-local memory for an image. Contents are undefined and no view is created
    pub fn create_image(&self, desc: &ImageDesc, name: &str) -> Result<RawImage> {
        let extent = desc.extent;
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(ResourceError::InvalidExtent {
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            }
                .into());
        }
        if desc.usage.is_empty() {
            return Err(ResourceError::InvalidUsage("image usage must not be empty").into());
        }

        let device = &self.device.logical;
        let handle = unsafe { device.create_image(&desc.create_info(), None) }.driver("vkCreateImage")?;
        let requirements = unsafe { device.get_image_memory_requirements(handle) };

        let allocation = self
            .lock()
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: desc.tiling == vk::ImageTiling::LINEAR,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|source| {
                        ResourceError::Allocation {
                            name: name.into(),
                            source,
                        }
                            .into()
                    })
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(handle, None) };
                return Err(e);
            }
        };

        if let Err(result) = unsafe { device.bind_image_memory(handle, allocation.memory(), allocation.offset()) } {
            self.free(allocation);
            unsafe { device.destroy_image(handle, None) };
            return Err(ResourceError::Driver {
                what: "vkBindImageMemory",
                result,
            }
                .into());
        }

        log::debug!(
            "Created image `{}` {}x{}x{} {:?}, {} mips, {} layers",
            name,
            extent.width,
            extent.height,
            extent.depth,
            desc.format,
            desc.mip_levels,
            desc.layer_count,
        );

        Ok(RawImage {
            handle,
            desc: *desc,
            allocation: Some(allocation),
        })
    }

    pub fn create_image_view(
        &self,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
        layer_count: u32,
    ) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(subresource_range(aspect, 0, mip_levels, 0, layer_count));
        Ok(unsafe { self.device.logical.create_image_view(&info, None) }.driver("vkCreateImageView")?)
    }

    pub fn create_sampler(&self, info: &SamplerInfo) -> Result<vk::Sampler> {
        let anisotropy = info
            .max_anisotropy
            .zip(self.device.max_sampler_anisotropy())
            .map(|(requested, limit)| requested.min(limit));
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(info.mag_filter)
            .min_filter(info.min_filter)
            .mipmap_mode(info.mipmap_mode)
            .address_mode_u(info.address_mode)
            .address_mode_v(info.address_mode)
            .address_mode_w(info.address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .min_lod(0.0)
            .max_lod(info.max_lod)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);
        Ok(unsafe { self.device.logical.create_sampler(&create_info, None) }.driver("vkCreateSampler")?)
    }

    /// Uploads one payload per array layer into mip 0.
    ///
    /// Each layer goes through its own staging buffer because layers may come from unrelated
    /// host allocations (cube faces, for instance). The layer ends up in `TRANSFER_DST_OPTIMAL`
    /// across all `mip_levels`.
    pub fn copy_data_to_image(
        &self,
        image: vk::Image,
        extent: vk::Extent3D,
        format: vk::Format,
        mip_levels: u32,
        layer_data: &[&[u8]],
    ) -> Result<()> {
        let layer_size = layer_byte_size(extent, format)?;
        for (layer, data) in layer_data.iter().enumerate() {
            if (data.len() as u64) < layer_size {
                return Err(ResourceError::LayerDataTooSmall {
                    layer: layer as u32,
                    expected: layer_size,
                    got: data.len() as u64,
                }
                    .into());
            }
        }

        let barrier_aspect = format::aspect_flags(format);
        let copy_aspect = format::copy_aspect(format);
        let to_transfer = LayoutTransition::between(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        for (layer, data) in layer_data.iter().enumerate() {
            let layer = layer as u32;
            let mut staging = StagingBuffer::new(
                self,
                layer_size,
                vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::CpuToGpu,
                "image layer staging",
            )?;
            staging.write(&data[..layer_size as usize])?;
            let src = staging.handle();

            self.executor.execute(|cmd, device| {
                let barrier = to_transfer.barrier(
                    image,
                    subresource_range(barrier_aspect, 0, mip_levels, layer, 1),
                );
                to_transfer.record(device, cmd, &[barrier]);

                let region = vk::BufferImageCopy::default()
                    .image_subresource(subresource_layers(copy_aspect, 0, layer))
                    .image_extent(extent);
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        src,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                Ok(())
            })?;
        }

        Ok(())
    }

    /// Fills mips `1..mip_levels` of every layer by successive linear blits from mip 0.
    ///
    /// Expects every level in `TRANSFER_DST_OPTIMAL` and leaves every level in `final_layout`.
    /// The format must support linear filtering of optimally tiled images, there is no
    /// fallback path.
    pub fn generate_mipmaps(
        &self,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent3D,
        mip_levels: u32,
        layer_count: u32,
        final_layout: vk::ImageLayout,
    ) -> Result<()> {
        assert!(mip_levels >= 1, "an image has at least one mip level");

        let features = self.device.format_properties(format).optimal_tiling_features;
        if !features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
            log::error!("{:?} does not support linear blits, cannot generate mipmaps", format);
            panic!("{:?} does not support linear blits, cannot generate mipmaps", format);
        }

        let aspect = format::aspect_flags(format);
        let dst_to_src = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        let src_to_final = LayoutTransition::between(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, final_layout);
        let dst_to_final = LayoutTransition::between(vk::ImageLayout::TRANSFER_DST_OPTIMAL, final_layout);

        self.executor.execute(|cmd, device| {
            for layer in 0..layer_count {
                for level in 1..mip_levels {
                    let previous = subresource_range(aspect, level - 1, 1, layer, 1);
                    dst_to_src.record(device, cmd, &[dst_to_src.barrier(image, previous)]);

                    let blit = vk::ImageBlit::default()
                        .src_subresource(subresource_layers(aspect, level - 1, layer))
                        .src_offsets([vk::Offset3D::default(), mip::level_corner(extent, level - 1)])
                        .dst_subresource(subresource_layers(aspect, level, layer))
                        .dst_offsets([vk::Offset3D::default(), mip::level_corner(extent, level)]);
                    unsafe {
                        device.cmd_blit_image(
                            cmd,
                            image,
                            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &[blit],
                            vk::Filter::LINEAR,
                        );
                    }

                    src_to_final.record(device, cmd, &[src_to_final.barrier(image, previous)]);
                }

                // The last level was only ever written to
                let last = subresource_range(aspect, mip_levels - 1, 1, layer, 1);
                dst_to_final.record(device, cmd, &[dst_to_final.barrier(image, last)]);
            }
            Ok(())
        })
    }

    /// Records and executes one barrier per array layer moving every mip from `old` to `new`
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        mip_levels: u32,
        layer_count: u32,
    ) -> Result<()> {
        if old_layout == new_layout {
            return Ok(());
        }
        let transition = LayoutTransition::between(old_layout, new_layout);
        self.executor.execute(|cmd, device| {
            record_layout_transition(device, cmd, image, format, &transition, mip_levels, layer_count);
            Ok(())
        })
    }

    /// Copies mip 0 of `layer` to the host. The image must be in `TRANSFER_SRC_OPTIMAL`
    pub fn read_image(
        &self,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent3D,
        layer: u32,
    ) -> Result<Vec<u8>> {
        let size = layer_byte_size(extent, format)?;
        let readback = StagingBuffer::new(
            self,
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "image readback",
        )?;
        let dst = readback.handle();

        self.executor.execute(|cmd, device| {
            let region = vk::BufferImageCopy::default()
                .image_subresource(subresource_layers(format::copy_aspect(format), 0, layer))
                .image_extent(extent);
            unsafe {
                device.cmd_copy_image_to_buffer(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst,
                    &[region],
                );
            }
            record_host_read_barrier(device, cmd, dst);
            Ok(())
        })?;

        readback.read()
    }

    pub fn destroy_image(&self, image: &mut RawImage) {
        let Some(allocation) = image.allocation.take() else {
            return;
        };
        self.free(allocation);
        unsafe {
            self.device.logical.destroy_image(image.handle, None);
        }
        image.handle = vk::Image::null();
    }

    pub fn destroy_image_view(&self, view: vk::ImageView) {
        if view != vk::ImageView::null() {
            unsafe { self.device.logical.destroy_image_view(view, None) };
        }
    }

    pub fn destroy_sampler(&self, sampler: vk::Sampler) {
        if sampler != vk::Sampler::null() {
            unsafe { self.device.logical.destroy_sampler(sampler, None) };
        }
    }

    fn allocate_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<RawBuffer> {
        let device = &self.device.logical;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { device.create_buffer(&buffer_info, None) }.driver("vkCreateBuffer")?;
        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };

        let allocation = self
            .lock()
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|source| {
                        ResourceError::Allocation {
                            name: name.into(),
                            source,
                        }
                            .into()
                    })
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(handle, None) };
                return Err(e);
            }
        };

        if let Err(result) = unsafe { device.bind_buffer_memory(handle, allocation.memory(), allocation.offset()) } {
            self.free(allocation);
            unsafe { device.destroy_buffer(handle, None) };
            return Err(ResourceError::Driver {
                what: "vkBindBufferMemory",
                result,
            }
                .into());
        }

        let memory_class = match location {
            MemoryLocation::GpuOnly => MemoryClass::DeviceLocal,
            _ => MemoryClass::HostVisible,
        };

        Ok(RawBuffer {
            handle,
            size,
            usage,
            memory_class,
            allocation: Some(allocation),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Allocator>> {
        self.memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))
    }

    fn free(&self, allocation: Allocation) {
        let freed = self
            .lock()
            .and_then(|mut allocator| allocator.free(allocation).map_err(Into::into));
        if let Err(e) = freed {
            log::error!("Failed to free device memory: {}", e);
        }
    }
}

/// Transient buffer that is returned to the allocator when it goes out of scope,
/// including on early returns from failed uploads
struct StagingBuffer<'a> {
    allocator: &'a ResourceAllocator,
    buffer: Option<RawBuffer>,
}

impl<'a> StagingBuffer<'a> {
    fn new(
        allocator: &'a ResourceAllocator,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let buffer = allocator.allocate_buffer(size, usage, location, name)?;
        Ok(Self {
            allocator,
            buffer: Some(buffer),
        })
    }

    fn handle(&self) -> vk::Buffer {
        self.buffer
            .as_ref()
            .map_or(vk::Buffer::null(), |buffer| buffer.handle)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.buffer.as_mut() {
            Some(buffer) => write_mapped(buffer, 0, data),
            None => Err(ResourceError::NotHostVisible.into()),
        }
    }

    fn zero(&mut self) -> Result<()> {
        let bytes = self
            .buffer
            .as_mut()
            .and_then(|buffer| {
                let size = buffer.size as usize;
                buffer
                    .allocation
                    .as_mut()
                    .and_then(|allocation| allocation.mapped_slice_mut())
                    .and_then(|bytes| bytes.get_mut(..size))
            })
            .ok_or(ResourceError::NotHostVisible)?;
        bytes.fill(0);
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        match self.buffer.as_ref() {
            Some(buffer) => Ok(mapped_bytes(buffer)?.to_vec()),
            None => Err(ResourceError::NotHostVisible.into()),
        }
    }

    /// Keeps the buffer alive past this scope
    fn release(mut self) -> RawBuffer {
        match self.buffer.take() {
            Some(buffer) => buffer,
            None => unreachable!("staging buffer released twice"),
        }
    }
}

impl Drop for StagingBuffer<'_> {
    fn drop(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            self.allocator.destroy_buffer(&mut buffer);
        }
    }
}

/// `len` bytes starting at `offset` must lie inside `size`
pub(crate) fn check_range(offset: u64, len: u64, size: u64) -> Result<(), ResourceError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ResourceError::OutOfBounds { offset, len, size }),
    }
}

fn write_mapped(buffer: &mut RawBuffer, offset: usize, data: &[u8]) -> Result<()> {
    let allocation = buffer
        .allocation
        .as_mut()
        .filter(|allocation| allocation.mapped_ptr().is_some())
        .ok_or(ResourceError::NotHostVisible)?;
    presser::copy_from_slice_to_offset(data, allocation, offset)?;
    Ok(())
}

fn mapped_bytes(buffer: &RawBuffer) -> Result<&[u8]> {
    Ok(buffer
        .allocation
        .as_ref()
        .and_then(|allocation| allocation.mapped_slice())
        .and_then(|bytes| bytes.get(..buffer.size as usize))
        .ok_or(ResourceError::NotHostVisible)?)
}

fn layer_byte_size(extent: vk::Extent3D, format: vk::Format) -> Result<u64> {
    let texel = format::copy_texel_size(format).ok_or(ResourceError::UnknownTexelSize(format))?;
    Ok(extent.width as u64 * extent.height as u64 * extent.depth as u64 * texel as u64)
}

fn record_host_read_barrier(device: &ash::Device, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
    let barrier = vk::BufferMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::HOST_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .size(vk::WHOLE_SIZE);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[],
            &[barrier],
            &[],
        );
    }
}

/// Records one barrier per array layer into an open command buffer
pub fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    transition: &LayoutTransition,
    mip_levels: u32,
    layer_count: u32,
) {
    let aspect = format::aspect_flags(format);
    let barriers = (0..layer_count)
        .map(|layer| transition.barrier(image, subresource_range(aspect, 0, mip_levels, layer, 1)))
        .collect::<SmallVec<[vk::ImageMemoryBarrier; 6]>>();
    transition.record(device, cmd, &barriers);
}

pub fn subresource_range(
    aspect: vk::ImageAspectFlags,
    base_mip_level: u32,
    level_count: u32,
    base_array_layer: u32,
    layer_count: u32,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level,
        level_count,
        base_array_layer,
        layer_count,
    }
}

fn subresource_layers(
    aspect: vk::ImageAspectFlags,
    mip_level: u32,
    layer: u32,
) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: aspect,
        mip_level,
        base_array_layer: layer,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_byte_size() {
        let extent = vk::Extent3D { width: 4, height: 2, depth: 1 };
        assert_eq!(layer_byte_size(extent, vk::Format::R8G8B8A8_UNORM).unwrap(), 32);
        assert_eq!(layer_byte_size(extent, vk::Format::R32G32B32A32_SFLOAT).unwrap(), 128);

        // Only the depth aspect is staged
        assert_eq!(layer_byte_size(extent, vk::Format::D32_SFLOAT_S8_UINT).unwrap(), 32);

        let err = layer_byte_size(extent, vk::Format::BC7_UNORM_BLOCK).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResourceError>(),
            Some(ResourceError::UnknownTexelSize(vk::Format::BC7_UNORM_BLOCK))
        ));
    }

    #[test]
    fn test_range_check() {
        assert!(check_range(0, 16, 16).is_ok());
        assert!(check_range(12, 4, 16).is_ok());
        assert!(matches!(
            check_range(12, 8, 16),
            Err(ResourceError::OutOfBounds { offset: 12, len: 8, size: 16 })
        ));
        // Would wrap around without the checked add
        assert!(matches!(
            check_range(u64::MAX - 1, 4, 16),
            Err(ResourceError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_image_desc_create_info() {
        let desc = ImageDesc {
            extent: vk::Extent3D { width: 16, height: 8, depth: 1 },
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            samples: vk::SampleCountFlags::TYPE_1,
            mip_levels: 5,
            layer_count: 6,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::SAMPLED,
            flags: vk::ImageCreateFlags::CUBE_COMPATIBLE,
        };
        let info = desc.create_info();
        assert_eq!(info.mip_levels, 5);
        assert_eq!(info.array_layers, 6);
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(info.flags, vk::ImageCreateFlags::CUBE_COMPATIBLE);
    }
}
