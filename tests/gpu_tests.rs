#[macro_use]
mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use ash::vk;
use glam::Vec4;
use kiln::{
    FrameRing, GpuBuffer, GpuBufferPool, GpuImage, HeadlessFrameRing, ImageKind, MemoryClass,
    RenderTargetPass, ResourceCreateInfo, ResourceError, SamplerInfo, XrFrameRing, XrImageSource,
};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn clear_pass(
    ctx: &common::GpuTestContext,
    clear: Vec4,
    final_layout: vk::ImageLayout,
    view_count: u32,
) -> Arc<RenderTargetPass> {
    let depth_format = ctx
        .device
        .device
        .supported_depth_format(&[vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT])
        .unwrap();

    let mut pass = RenderTargetPass::new();
    let color = pass.add_color_attachment(
        vk::Format::R8G8B8A8_UNORM,
        vk::SampleCountFlags::TYPE_1,
        clear,
        final_layout,
    );
    let depth = pass.add_depth_attachment(depth_format, vk::SampleCountFlags::TYPE_1, 1.0, 0);
    pass.add_subpass().color(color).depth(depth);
    if view_count > 1 {
        pass.multiview(view_count);
    }
    pass.create(ctx.device.device.clone()).unwrap();
    Arc::new(pass)
}

fn clear_frame(ring: &mut dyn FrameRing, pass: &RenderTargetPass) -> u32 {
    let frame = ring.begin_frame().unwrap().expect("frame skipped");
    pass.begin(
        frame.command_buffer,
        frame.framebuffer,
        frame.render_area(),
        vk::SubpassContents::INLINE,
    );
    pass.end(frame.command_buffer);
    ring.end_frame().unwrap();
    frame.index
}

#[test]
fn test_host_visible_buffer_roundtrip() {
    let ctx = gpu_context!();
    let allocator = ctx.allocator();

    for size in [1usize, 4096, 1 << 20] {
        let data = pattern(size);
        let mut buffer = allocator
            .create_buffer(
                Some(&data),
                size as u64,
                vk::BufferUsageFlags::STORAGE_BUFFER,
                MemoryClass::HostVisible,
                "roundtrip",
            )
            .unwrap();
        assert_eq!(allocator.read_buffer(&buffer).unwrap(), data);
        allocator.destroy_buffer(&mut buffer);
    }
}

#[test]
fn test_buffer_without_data_is_zeroed() {
    let ctx = gpu_context!();
    let allocator = ctx.allocator();

    for memory_class in [MemoryClass::HostVisible, MemoryClass::DeviceLocal] {
        let mut buffer = allocator
            .create_buffer(
                None,
                256,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
                memory_class,
                "zeroed",
            )
            .unwrap();
        assert!(allocator.read_buffer(&buffer).unwrap().iter().all(|&b| b == 0));
        allocator.destroy_buffer(&mut buffer);
    }
}

#[test]
fn test_zero_sized_buffer_rejected() {
    let ctx = gpu_context!();
    let allocator = ctx.allocator();

    let err = allocator
        .create_buffer(
            None,
            0,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryClass::HostVisible,
            "empty",
        )
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<ResourceError>(), Some(ResourceError::EmptyBuffer)));
}

#[test]
fn test_device_local_buffer_staged_upload() {
    let ctx = gpu_context!();
    let allocator = ctx.allocator();

    let data = pattern(64 * 1024);
    let mut buffer = allocator
        .create_buffer(
            Some(&data),
            data.len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryClass::DeviceLocal,
            "staged",
        )
        .unwrap();
    assert_eq!(allocator.read_buffer(&buffer).unwrap(), data);

    // Device-local memory is not mapped
    let err = allocator.write_buffer(&mut buffer, 0, &data[..16]).unwrap_err();
    assert!(matches!(err.downcast_ref::<ResourceError>(), Some(ResourceError::NotHostVisible)));
    allocator.destroy_buffer(&mut buffer);
}

#[test]
fn test_gpu_buffer_lifecycle() {
    let ctx = gpu_context!();
    let mut buffer = GpuBuffer::new(ctx.allocator()).with_name("positions");
    assert!(buffer.is_empty());
    assert_eq!(buffer.handle(), vk::Buffer::null());

    let positions = [[0.0f32, 1.0, 2.0], [3.0, 4.0, 5.0]];
    buffer
        .data(&positions, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryClass::HostVisible)
        .unwrap();
    assert_eq!(buffer.count(), 2);
    assert_eq!(buffer.stride(), 12);
    assert_eq!(buffer.size(), 24);
    assert_eq!(buffer.memory_class(), Some(MemoryClass::HostVisible));

    buffer.write(12, bytemuck::cast_slice(&[9.0f32, 9.0, 9.0])).unwrap();
    let read = buffer.read().unwrap();
    let floats: &[f32] = bytemuck::cast_slice(&read);
    assert_eq!(floats, &[0.0, 1.0, 2.0, 9.0, 9.0, 9.0]);

    buffer.clear().unwrap();
    assert!(buffer.is_empty());
    assert_eq!(buffer.size(), 0);
}

#[test]
fn test_write_past_end_rejected() {
    let ctx = gpu_context!();
    let allocator = ctx.allocator();
    let mut buffer = allocator
        .create_buffer(
            None,
            16,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryClass::HostVisible,
            "bounds",
        )
        .unwrap();

    for offset in [13, u64::MAX - 1] {
        let err = allocator.write_buffer(&mut buffer, offset, &[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResourceError>(),
            Some(ResourceError::OutOfBounds { len: 4, size: 16, .. })
        ));
    }
    allocator.write_buffer(&mut buffer, 12, &[1, 2, 3, 4]).unwrap();
    allocator.destroy_buffer(&mut buffer);
}

#[test]
fn test_buffer_pool_items_are_aligned() {
    let ctx = gpu_context!();
    let alignment = ctx.device.device.properties.limits.min_uniform_buffer_offset_alignment;
    let mut pool = GpuBufferPool::uniform(ctx.allocator(), 3, 72, MemoryClass::HostVisible, "per frame").unwrap();

    assert_eq!(pool.count(), 3);
    assert_eq!(pool.stride(), 72);
    assert_eq!(pool.item_size() % alignment.max(1), 0);
    assert_eq!(pool.size(), pool.item_size() * 3);

    for index in 0..3u64 {
        let item = pool.item(index).unwrap();
        assert_eq!(item.buffer, pool.handle());
        assert_eq!(item.offset % alignment.max(1), 0);
        assert_eq!(item.size, 72);
        pool.write(index, 0, &vec![index as u8 + 1; 72]).unwrap();
    }
    for index in 0..3u64 {
        assert_eq!(pool.read(index).unwrap(), vec![index as u8 + 1; 72]);
    }

    assert!(pool.item(3).is_none());
    assert!(pool.write(3, 0, &[0]).is_err());
    let err = pool.write(0, 70, &[0; 4]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ResourceError>(),
        Some(ResourceError::OutOfBounds { offset: 70, len: 4, size: 72 })
    ));
}

#[test]
fn test_sampled_image_with_mip_chain() {
    let ctx = gpu_context!();
    let pixels = pattern(64 * 32 * 4);
    let info = ResourceCreateInfo::image(
        vk::Format::R8G8B8A8_UNORM,
        vk::Extent3D {
            width: 64,
            height: 32,
            depth: 1,
        },
    )
        .image_usage(vk::ImageUsageFlags::SAMPLED)
        .layer_data(&pixels)
        .generate_mips(true)
        .name("checker")
        .build()
        .unwrap();

    let mut image = GpuImage::new(ctx.allocator(), &info, ImageKind::SampledFixed).unwrap();
    assert_eq!(image.mip_levels(), 7);
    assert_eq!(image.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(image.view_type(), vk::ImageViewType::TYPE_2D);

    let sampler = image.sampler(&SamplerInfo::default()).unwrap();
    assert_ne!(sampler, vk::Sampler::null());
    // Created once, then reused
    assert_eq!(image.sampler(&SamplerInfo::default()).unwrap(), sampler);
    assert_eq!(image.sampler_info(), Some(&SamplerInfo::default()));

    // Different settings replace the sampler
    let nearest = SamplerInfo {
        mag_filter: vk::Filter::NEAREST,
        min_filter: vk::Filter::NEAREST,
        ..Default::default()
    };
    assert_ne!(image.sampler(&nearest).unwrap(), vk::Sampler::null());
    assert_eq!(image.sampler_info(), Some(&nearest));

    // Fixed images keep their size
    assert!(!image.resize(vk::Extent2D { width: 8, height: 8 }).unwrap());
    assert_eq!(image.extent_2d(), vk::Extent2D { width: 64, height: 32 });
}

#[test]
fn test_image_upload_readback() {
    let ctx = gpu_context!();
    let pixels = pattern(16 * 16 * 4);
    let info = ResourceCreateInfo::image(
        vk::Format::R8G8B8A8_UNORM,
        vk::Extent3D {
            width: 16,
            height: 16,
            depth: 1,
        },
    )
        .image_usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC)
        .layer_data(&pixels)
        .build()
        .unwrap();

    let mut image = GpuImage::new(ctx.allocator(), &info, ImageKind::SampledFixed).unwrap();
    assert_eq!(image.read_layer(0).unwrap(), pixels);
    assert_eq!(image.layout(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
}

#[test]
fn test_cube_upload_reads_back_every_face() {
    let ctx = gpu_context!();
    let faces = (0..6u8)
        .map(|face| {
            (0..8 * 8 * 4)
                .map(|i| face.wrapping_mul(40).wrapping_add((i % 37) as u8))
                .collect::<Vec<u8>>()
        })
        .collect::<Vec<_>>();

    let mut builder = ResourceCreateInfo::image(
        vk::Format::R8G8B8A8_UNORM,
        vk::Extent3D {
            width: 8,
            height: 8,
            depth: 1,
        },
    )
        .image_usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC)
        .flags(vk::ImageCreateFlags::CUBE_COMPATIBLE)
        .layer_count(6)
        .name("cube");
    for face in &faces {
        builder = builder.layer_data(face);
    }
    let info = builder.build().unwrap();

    let mut image = GpuImage::new(ctx.allocator(), &info, ImageKind::SampledFixed).unwrap();
    assert_eq!(image.layer_count(), 6);
    assert_eq!(image.view_type(), vk::ImageViewType::CUBE);
    for (layer, face) in faces.iter().enumerate() {
        assert_eq!(&image.read_layer(layer as u32).unwrap(), face);
    }
}

#[test]
fn test_storage_image_transitions() {
    let ctx = gpu_context!();
    let info = ResourceCreateInfo::image(
        vk::Format::R8G8B8A8_UNORM,
        vk::Extent3D {
            width: 32,
            height: 32,
            depth: 1,
        },
    )
        .image_usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED)
        .build()
        .unwrap();

    let mut image = GpuImage::new(ctx.allocator(), &info, ImageKind::Storage).unwrap();
    assert_eq!(image.layout(), vk::ImageLayout::GENERAL);

    image.transition(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
    assert_eq!(image.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    // Same layout again is a no-op
    image.transition(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
    assert_eq!(image.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    image.transition(vk::ImageLayout::GENERAL).unwrap();
    assert_eq!(image.layout(), vk::ImageLayout::GENERAL);
}

#[test]
fn test_image_with_missing_layers_rejected() {
    let pixels = pattern(8 * 8 * 4);
    let err = ResourceCreateInfo::image(
        vk::Format::R8G8B8A8_UNORM,
        vk::Extent3D {
            width: 8,
            height: 8,
            depth: 1,
        },
    )
        .image_usage(vk::ImageUsageFlags::SAMPLED)
        .layer_count(6)
        .layer_data(&pixels)
        .build()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ResourceError>(),
        Some(ResourceError::MissingLayerData { expected: 6, got: 1 })
    ));
}

#[test]
fn test_render_pass_formats() {
    let ctx = gpu_context!();
    let pass = clear_pass(&ctx, Vec4::ZERO, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, 1);
    assert!(pass.is_finalized());
    assert_eq!(pass.color_format(0), vk::Format::R8G8B8A8_UNORM);
    assert_eq!(pass.color_format(1), vk::Format::UNDEFINED);
    assert!(pass.depth_format().is_some());
    assert_eq!(pass.clear_values().len(), 2);
    assert_eq!(pass.subpass_count(), 1);
}

#[test]
fn test_render_pass_frozen_after_create() {
    let ctx = gpu_context!();
    let mut pass = RenderTargetPass::new();
    pass.add_color_attachment(
        vk::Format::R8G8B8A8_UNORM,
        vk::SampleCountFlags::TYPE_1,
        Vec4::ZERO,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );
    pass.create(ctx.device.device.clone()).unwrap();
    assert_eq!(pass.subpass_count(), 1);

    let added_subpass = catch_unwind(AssertUnwindSafe(|| {
        pass.add_subpass();
    }));
    assert!(added_subpass.is_err());
    let added_attachment = catch_unwind(AssertUnwindSafe(|| {
        pass.add_color_attachment(
            vk::Format::R8G8B8A8_UNORM,
            vk::SampleCountFlags::TYPE_1,
            Vec4::ZERO,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
    }));
    assert!(added_attachment.is_err());
    assert_eq!(pass.attachments().len(), 1);
    assert_eq!(pass.subpass_count(), 1);
}

#[test]
fn test_headless_ring_cycles_slots() {
    let ctx = gpu_context!();
    let pass = clear_pass(&ctx, Vec4::ZERO, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, 1);
    let extent = vk::Extent2D {
        width: 512,
        height: 512,
    };
    let mut ring = HeadlessFrameRing::new(ctx.allocator(), pass.clone(), extent, 3).unwrap();

    assert_eq!(ring.image_count(), 3);
    assert_eq!(ring.extent(), extent);
    assert!(ring.present_modes().is_empty());
    assert!(!ring.set_present_mode(vk::PresentModeKHR::FIFO).unwrap());

    let indices = (0..4)
        .map(|_| clear_frame(&mut ring, &pass))
        .collect::<Vec<_>>();
    assert_eq!(indices, [0, 1, 2, 0]);
    assert!(!ring.is_acquired());

    let resized = vk::Extent2D {
        width: 256,
        height: 128,
    };
    assert!(ring.update_extent(resized).unwrap());
    assert_eq!(ring.extent(), resized);
    assert_eq!(ring.frame_index(), 0);
    assert_eq!(ring.color_image(0).unwrap().extent_2d(), resized);

    assert!(ring.set_image_count(2).unwrap());
    assert_eq!(ring.image_count(), 2);
    let indices = (0..3)
        .map(|_| clear_frame(&mut ring, &pass))
        .collect::<Vec<_>>();
    assert_eq!(indices, [0, 1, 0]);
}

#[test]
fn test_headless_ring_rejects_zero_extent() {
    let ctx = gpu_context!();
    let pass = clear_pass(&ctx, Vec4::ZERO, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, 1);
    let err = HeadlessFrameRing::new(ctx.allocator(), pass, vk::Extent2D { width: 0, height: 64 }, 2)
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<ResourceError>(),
        Some(ResourceError::InvalidExtent { .. })
    ));
}

#[test]
fn test_headless_ring_keeps_state_after_rejected_update() {
    let ctx = gpu_context!();
    let pass = clear_pass(&ctx, Vec4::ZERO, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, 1);
    let extent = vk::Extent2D {
        width: 128,
        height: 64,
    };
    let mut ring = HeadlessFrameRing::new(ctx.allocator(), pass.clone(), extent, 2).unwrap();
    clear_frame(&mut ring, &pass);

    let err = ring.update_extent(vk::Extent2D { width: 0, height: 0 }).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ResourceError>(),
        Some(ResourceError::InvalidExtent { .. })
    ));
    let too_large = ctx.device.device.properties.limits.max_image_dimension2_d + 1;
    let err = ring
        .update_extent(vk::Extent2D { width: too_large, height: 64 })
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ResourceError>(),
        Some(ResourceError::ExtentTooLarge { .. })
    ));
    assert!(ring.set_image_count(0).is_err());

    assert_eq!(ring.extent(), extent);
    assert_eq!(ring.image_count(), 2);
    assert_eq!(ring.frame_index(), 1);

    // The old slots keep working and still match the reported extent
    let frame = ring.begin_frame().unwrap().unwrap();
    assert_eq!(frame.index, 1);
    assert_eq!(frame.extent, extent);
    pass.begin(frame.command_buffer, frame.framebuffer, frame.render_area(), vk::SubpassContents::INLINE);
    pass.end(frame.command_buffer);
    ring.end_frame().unwrap();
    assert_eq!(ring.color_image(1).unwrap().extent_2d(), extent);
    assert_eq!(clear_frame(&mut ring, &pass), 0);
}

#[test]
fn test_headless_ring_refuses_second_acquire() {
    let ctx = gpu_context!();
    let pass = clear_pass(&ctx, Vec4::ZERO, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, 1);
    let extent = vk::Extent2D {
        width: 32,
        height: 32,
    };
    let mut ring = HeadlessFrameRing::new(ctx.allocator(), pass.clone(), extent, 2).unwrap();

    let frame = ring.begin_frame().unwrap().unwrap();
    let second = catch_unwind(AssertUnwindSafe(|| ring.begin_frame()));
    assert!(second.is_err());
    assert!(ring.is_acquired());
    assert_eq!(ring.frame_index(), 0);

    // The first frame is still intact and can be finished
    pass.begin(frame.command_buffer, frame.framebuffer, frame.render_area(), vk::SubpassContents::INLINE);
    pass.end(frame.command_buffer);
    ring.end_frame().unwrap();
    assert!(!ring.is_acquired());
    assert_eq!(clear_frame(&mut ring, &pass), 1);
}

#[test]
fn test_headless_clear_readback() {
    let ctx = gpu_context!();
    let pass = clear_pass(&ctx, Vec4::new(1.0, 0.0, 0.0, 1.0), vk::ImageLayout::TRANSFER_SRC_OPTIMAL, 1);
    let extent = vk::Extent2D {
        width: 64,
        height: 64,
    };
    let mut ring = HeadlessFrameRing::new(ctx.allocator(), pass.clone(), extent, 2).unwrap();

    assert_eq!(clear_frame(&mut ring, &pass), 0);
    ring.wait_idle().unwrap();

    let image = ring.color_image_mut(0).unwrap();
    assert_eq!(image.layout(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    let texels = image.read_layer(0).unwrap();
    assert_eq!(texels.len(), 64 * 64 * 4);
    assert!(texels.chunks_exact(4).all(|texel| texel == [255, 0, 0, 255]));
}

/// Stands in for an XR runtime: layered images handed out round robin
struct FakeXrSource {
    images: Vec<GpuImage>,
    views: Vec<vk::ImageView>,
    next: u32,
    released: u32,
    /// Handed out instead of the round-robin index when set
    forced_index: Option<u32>,
}

impl FakeXrSource {
    fn new(ctx: &common::GpuTestContext, count: u32, extent: vk::Extent2D) -> Self {
        let images = (0..count)
            .map(|i| {
                GpuImage::attachment(
                    ctx.allocator(),
                    vk::Format::R8G8B8A8_UNORM,
                    extent,
                    vk::SampleCountFlags::TYPE_1,
                    vk::ImageUsageFlags::TRANSFER_SRC,
                    2,
                    &format!("xr image {}", i),
                )
                    .unwrap()
            })
            .collect::<Vec<_>>();
        let views = images.iter().map(GpuImage::view).collect();
        Self {
            images,
            views,
            next: 0,
            released: 0,
            forced_index: None,
        }
    }
}

impl XrImageSource for FakeXrSource {
    fn extent(&self) -> vk::Extent2D {
        self.images[0].extent_2d()
    }

    fn view_count(&self) -> u32 {
        2
    }

    fn color_format(&self) -> vk::Format {
        vk::Format::R8G8B8A8_UNORM
    }

    fn color_views(&self) -> &[vk::ImageView] {
        &self.views
    }

    fn current_image_index(&mut self) -> color_eyre::Result<u32> {
        if let Some(index) = self.forced_index {
            return Ok(index);
        }
        let index = self.next;
        self.next = (self.next + 1) % self.images.len() as u32;
        Ok(index)
    }

    fn release_image(&mut self) -> color_eyre::Result<()> {
        self.released += 1;
        Ok(())
    }
}

#[test]
fn test_xr_ring_follows_runtime_index() {
    let ctx = gpu_context!();
    if !ctx.device.device.supports_multiview() {
        eprintln!("skipping: multiview not supported");
        return;
    }

    let extent = vk::Extent2D {
        width: 32,
        height: 32,
    };
    let pass = clear_pass(&ctx, Vec4::new(0.0, 1.0, 0.0, 1.0), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, 2);
    let source = FakeXrSource::new(&ctx, 2, extent);
    let mut ring = XrFrameRing::new(ctx.allocator(), pass.clone(), source).unwrap();

    assert_eq!(ring.image_count(), 2);
    assert!(ring.present_modes().is_empty());
    assert!(!ring.update_extent(vk::Extent2D { width: 64, height: 64 }).unwrap());
    assert!(!ring.set_image_count(3).unwrap());
    assert!(!ring.set_present_mode(vk::PresentModeKHR::MAILBOX).unwrap());

    // Depth was not supplied, so the ring made a layered one
    let depth_index = pass.depth_index().unwrap() as usize;
    let depth = ring.shared_targets().unwrap().image(depth_index).unwrap();
    assert_eq!(depth.layer_count(), 2);

    let indices = (0..3)
        .map(|_| clear_frame(&mut ring, &pass))
        .collect::<Vec<_>>();
    assert_eq!(indices, [0, 1, 0]);
    assert_eq!(ring.source().released, 3);

    ctx.device.device.wait_idle().unwrap();
    let image = &mut ring.source_mut().images[1];
    for layer in 0..2 {
        let texels = image.read_layer(layer).unwrap();
        assert!(texels.chunks_exact(4).all(|texel| texel == [0, 255, 0, 255]));
    }
}

#[test]
fn test_xr_ring_releases_image_of_aborted_frame() {
    let ctx = gpu_context!();
    if !ctx.device.device.supports_multiview() {
        eprintln!("skipping: multiview not supported");
        return;
    }

    let extent = vk::Extent2D {
        width: 16,
        height: 16,
    };
    let pass = clear_pass(&ctx, Vec4::ONE, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, 2);
    let source = FakeXrSource::new(&ctx, 2, extent);
    let mut ring = XrFrameRing::new(ctx.allocator(), pass.clone(), source).unwrap();

    // The runtime points at an image the ring does not know
    ring.source_mut().forced_index = Some(7);
    assert!(ring.begin_frame().is_err());
    assert!(!ring.is_acquired());
    assert_eq!(ring.source().released, 1);

    ring.source_mut().forced_index = None;
    assert_eq!(clear_frame(&mut ring, &pass), 0);
    assert_eq!(ring.source().released, 2);
}
