use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::resource_ctx::allocator::{self, ImageDesc, RawImage, ResourceAllocator};
use crate::renderer::contexts::resource_ctx::format;
use crate::renderer::contexts::resource_ctx::layout::LayoutState;
use crate::renderer::contexts::resource_ctx::mip;
use crate::renderer::error::ResourceError;
use crate::renderer::resources::create_info::{ResourceCreateInfo, ResourceKind, SamplerInfo};

/// What an image is for. Decides the layout it rests in and whether it can be resized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Render target that follows the size of the surface it is drawn into
    ColorAttachment,
    /// Sampled texture whose contents are baked at creation
    SampledFixed,
    /// Read/write image for compute work
    Storage,
}

impl ImageKind {
    pub fn target_layout(self, format: vk::Format) -> vk::ImageLayout {
        match self {
            ImageKind::ColorAttachment if format::is_depth_stencil(format) => {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            }
            ImageKind::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageKind::SampledFixed => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageKind::Storage => vk::ImageLayout::GENERAL,
        }
    }

    pub fn required_usage(self, format: vk::Format) -> vk::ImageUsageFlags {
        match self {
            ImageKind::ColorAttachment if format::is_depth_stencil(format) => {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            }
            ImageKind::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ImageKind::SampledFixed => vk::ImageUsageFlags::SAMPLED,
            ImageKind::Storage => vk::ImageUsageFlags::STORAGE,
        }
    }
}

/// Image, view and optional sampler sharing one lifetime.
///
/// The tracked layout only changes through [`GpuImage::transition`] (or a render pass that
/// reports its final layout), so it always matches what the GPU last did with the image.
pub struct GpuImage {
    raw: RawImage,
    view: vk::ImageView,
    /// Requested settings next to the sampler built from them
    sampler: Option<(SamplerInfo, vk::Sampler)>,
    view_type: vk::ImageViewType,
    aspect: vk::ImageAspectFlags,
    layout: LayoutState,
    kind: ImageKind,
    name: String,
    allocator: Arc<ResourceAllocator>,
}

impl GpuImage {
    pub fn new(
        allocator: Arc<ResourceAllocator>,
        info: &ResourceCreateInfo,
        kind: ImageKind,
    ) -> Result<Self> {
        assert_eq!(info.kind(), ResourceKind::Image, "`{}` does not describe an image", info.name());

        let format = info.format();
        let has_data = !info.layer_data().is_empty();
        let mip_levels = if info.generate_mips() {
            mip::full_chain_levels(info.extent())
        } else {
            1
        };

        let mut usage = info.image_usage() | kind.required_usage(format);
        if has_data {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        }

        let desc = ImageDesc {
            extent: info.extent(),
            image_type: info.image_type(),
            format,
            samples: info.samples(),
            mip_levels,
            layer_count: info.layer_count(),
            tiling: info.tiling(),
            usage,
            flags: info.flags(),
        };
        Self::create(allocator, desc, kind, info.name(), info.layer_data())
    }

    /// Render target of `extent` with no initial contents, one layer per rendered view
    pub fn attachment(
        allocator: Arc<ResourceAllocator>,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
        layers: u32,
        name: &str,
    ) -> Result<Self> {
        let info = ResourceCreateInfo::image(format, extent_3d(extent))
            .image_usage(usage | ImageKind::ColorAttachment.required_usage(format))
            .samples(samples)
            .layer_count(layers)
            .name(name)
            .build()?;
        Self::new(allocator, &info, ImageKind::ColorAttachment)
    }

    fn create(
        allocator: Arc<ResourceAllocator>,
        desc: ImageDesc,
        kind: ImageKind,
        name: &str,
        layer_data: &[&[u8]],
    ) -> Result<Self> {
        let mut raw = allocator.create_image(&desc, name)?;
        let view_type = view_type_for(desc.image_type, desc.layer_count, desc.flags);
        let aspect = format::aspect_flags(desc.format);
        let target = kind.target_layout(desc.format);

        let view = initialize(&allocator, &raw, layer_data, target).and_then(|()| {
            allocator.create_image_view(
                raw.handle,
                view_type,
                desc.format,
                aspect,
                desc.mip_levels,
                desc.layer_count,
            )
        });
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                allocator.destroy_image(&mut raw);
                return Err(e);
            }
        };

        Ok(Self {
            raw,
            view,
            sampler: None,
            view_type,
            aspect,
            layout: LayoutState::new(target),
            kind,
            name: name.to_owned(),
            allocator,
        })
    }

    /// Recreates a color attachment at `extent`. Other kinds keep their size and return `false`
    pub fn resize(&mut self, extent: vk::Extent2D) -> Result<bool> {
        match self.kind {
            ImageKind::ColorAttachment => {
                let extent = extent_3d(extent);
                if extent == self.raw.desc.extent {
                    return Ok(true);
                }

                let desc = self.raw.desc;
                let desc = ImageDesc {
                    extent,
                    mip_levels: if desc.mip_levels > 1 {
                        mip::full_chain_levels(extent)
                    } else {
                        1
                    },
                    ..desc
                };
                let mut replacement = Self::create(self.allocator.clone(), desc, self.kind, &self.name, &[])?;
                replacement.sampler = self.sampler.take();

                log::debug!("Resized `{}` to {}x{}", self.name, extent.width, extent.height);
                *self = replacement;
                Ok(true)
            }
            ImageKind::SampledFixed | ImageKind::Storage => {
                log::warn!("Image `{}` ({:?}) has a fixed extent, ignoring resize", self.name, self.kind);
                Ok(false)
            }
        }
    }

    /// Creates the sampler on first use. Asking with different settings later replaces it,
    /// after the graphics queue has gone idle
    pub fn sampler(&mut self, info: &SamplerInfo) -> Result<vk::Sampler> {
        match self.sampler {
            Some((cached, sampler)) if cached == *info => return Ok(sampler),
            Some((_, old)) => {
                log::debug!("Sampler settings of `{}` changed, recreating", self.name);
                self.allocator.wait_idle()?;
                self.allocator.destroy_sampler(old);
                self.sampler = None;
            }
            None => {}
        }

        let clamped = SamplerInfo {
            max_lod: info.max_lod.min(self.raw.desc.mip_levels as f32),
            ..*info
        };
        let sampler = self.allocator.create_sampler(&clamped)?;
        self.sampler = Some((*info, sampler));
        Ok(sampler)
    }

    /// Settings the current sampler was requested with
    pub fn sampler_info(&self) -> Option<&SamplerInfo> {
        self.sampler.as_ref().map(|(info, _)| info)
    }

    /// Moves every mip and layer to `new_layout` and waits for it
    pub fn transition(&mut self, new_layout: vk::ImageLayout) -> Result<()> {
        let Some(transition) = self.layout.plan(new_layout) else {
            return Ok(());
        };
        self.allocator.transition_image_layout(
            self.raw.handle,
            self.raw.desc.format,
            transition.old_layout,
            transition.new_layout,
            self.raw.desc.mip_levels,
            self.raw.desc.layer_count,
        )?;
        self.layout.commit(new_layout);
        Ok(())
    }

    /// Records the transition into `cmd` instead of submitting it. The tracked layout is
    /// updated right away, so `cmd` must be submitted before the image is used again
    pub fn record_transition(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        new_layout: vk::ImageLayout,
    ) {
        let Some(transition) = self.layout.plan(new_layout) else {
            return;
        };
        allocator::record_layout_transition(
            device,
            cmd,
            self.raw.handle,
            self.raw.desc.format,
            &transition,
            self.raw.desc.mip_levels,
            self.raw.desc.layer_count,
        );
        self.layout.commit(new_layout);
    }

    /// Copies mip 0 of `layer` back to the host, leaving the image in `TRANSFER_SRC_OPTIMAL`
    pub fn read_layer(&mut self, layer: u32) -> Result<Vec<u8>> {
        if !self.raw.desc.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
            return Err(ResourceError::InvalidUsage("reading an image requires TRANSFER_SRC usage").into());
        }
        self.transition(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
        self.allocator.read_image(
            self.raw.handle,
            self.raw.desc.format,
            self.raw.desc.extent,
            layer,
        )
    }

    /// A render pass left the image in `layout`
    pub(crate) fn note_render_pass_layout(&mut self, layout: vk::ImageLayout) {
        self.layout.commit(layout);
    }

    pub fn image(&self) -> vk::Image {
        self.raw.handle
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.raw.desc.extent
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.raw.desc.extent.width,
            height: self.raw.desc.extent.height,
        }
    }

    pub fn format(&self) -> vk::Format {
        self.raw.desc.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.raw.desc.mip_levels
    }

    pub fn layer_count(&self) -> u32 {
        self.raw.desc.layer_count
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.raw.desc.samples
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.raw.desc.usage
    }

    pub fn view_type(&self) -> vk::ImageViewType {
        self.view_type
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout.current()
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.wait_idle() {
            log::error!("Failed to wait for idle before destroying `{}`: {}", self.name, e);
        }
        if let Some((_, sampler)) = self.sampler.take() {
            self.allocator.destroy_sampler(sampler);
        }
        self.allocator.destroy_image_view(self.view);
        self.allocator.destroy_image(&mut self.raw);
    }
}

fn initialize(
    allocator: &ResourceAllocator,
    raw: &RawImage,
    layer_data: &[&[u8]],
    target: vk::ImageLayout,
) -> Result<()> {
    let desc = &raw.desc;
    if layer_data.is_empty() {
        return allocator.transition_image_layout(
            raw.handle,
            desc.format,
            vk::ImageLayout::UNDEFINED,
            target,
            desc.mip_levels,
            desc.layer_count,
        );
    }

    allocator.copy_data_to_image(raw.handle, desc.extent, desc.format, desc.mip_levels, layer_data)?;
    if desc.mip_levels > 1 {
        allocator.generate_mipmaps(
            raw.handle,
            desc.format,
            desc.extent,
            desc.mip_levels,
            desc.layer_count,
            target,
        )
    } else {
        allocator.transition_image_layout(
            raw.handle,
            desc.format,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            target,
            desc.mip_levels,
            desc.layer_count,
        )
    }
}

pub fn view_type_for(
    image_type: vk::ImageType,
    layer_count: u32,
    flags: vk::ImageCreateFlags,
) -> vk::ImageViewType {
    match image_type {
        vk::ImageType::TYPE_1D if layer_count > 1 => vk::ImageViewType::TYPE_1D_ARRAY,
        vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        _ if flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) && layer_count == 6 => {
            vk::ImageViewType::CUBE
        }
        _ if flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) && layer_count % 6 == 0 => {
            vk::ImageViewType::CUBE_ARRAY
        }
        _ if layer_count > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        _ => vk::ImageViewType::TYPE_2D,
    }
}

fn extent_3d(extent: vk::Extent2D) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: 1,
    }
}
