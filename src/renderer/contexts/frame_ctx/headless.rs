use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, Result};
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::frame_ctx::cursor::FrameCursor;
use crate::renderer::contexts::frame_ctx::slot::{AttachmentRole, FrameSlot, FrameTarget, SharedTargets};
use crate::renderer::contexts::frame_ctx::{FrameContext, FrameRing};
use crate::renderer::contexts::pass_ctx::render_pass::RenderTargetPass;
use crate::renderer::contexts::resource_ctx::allocator::ResourceAllocator;
use crate::renderer::error::ResourceError;
use crate::renderer::resources::image::GpuImage;

/// Offscreen ring rendering into images it owns.
///
/// Each slot gets its own color image, readable afterwards through
/// [`HeadlessFrameRing::color_image_mut`].
pub struct HeadlessFrameRing {
    targets: Vec<FrameTarget>,
    slots: Vec<FrameSlot>,
    shared: Option<SharedTargets>,
    cursor: FrameCursor,
    extent: vk::Extent2D,
    image_count: u32,
    slot_color: usize,

    pass: Arc<RenderTargetPass>,
    allocator: Arc<ResourceAllocator>,
    queue: Arc<Queue>,
    device: Arc<RenderDevice>,
}

impl HeadlessFrameRing {
    pub fn new(
        allocator: Arc<ResourceAllocator>,
        pass: Arc<RenderTargetPass>,
        extent: vk::Extent2D,
        image_count: u32,
    ) -> Result<Self> {
        assert!(pass.is_finalized(), "create the render pass before building a frame ring on it");

        let device = allocator.device().clone();
        let queue = device.graphics_queue().clone();
        let mut ring = Self {
            targets: Vec::new(),
            slots: Vec::new(),
            shared: None,
            cursor: FrameCursor::new(image_count.max(1)),
            extent,
            image_count,
            slot_color: 0,
            pass,
            allocator,
            queue,
            device,
        };
        ring.apply()?;
        Ok(ring)
    }

    /// Waits for the device to go idle, then rebuilds every slot at the current extent and
    /// image count
    pub fn apply(&mut self) -> Result<()> {
        self.rebuild(self.extent, self.image_count)
    }

    /// Builds a full set of slots for `extent` and `image_count` next to the current one and
    /// swaps it in. On error the ring keeps its previous slots, extent and image count
    fn rebuild(&mut self, extent: vk::Extent2D, image_count: u32) -> Result<()> {
        assert!(!self.cursor.is_acquired(), "cannot rebuild the frame ring while a frame is acquired");
        validate_extent(extent, self.device.properties.limits.max_image_dimension2_d)?;
        if image_count == 0 {
            return Err(eyre!("a frame ring needs at least one image"));
        }

        self.device.wait_idle()?;

        let layers = self.pass.view_count();
        let shared = SharedTargets::new(&self.allocator, &self.pass, extent, layers, false)?;
        let slot_color = shared
            .roles()
            .iter()
            .position(|role| *role == AttachmentRole::SlotColor)
            .ok_or_else(|| eyre!("render pass has no frame color attachment"))?;
        let format = self.pass.attachments()[slot_color].format;

        let mut targets = Vec::with_capacity(image_count as usize);
        let mut slots = Vec::with_capacity(image_count as usize);
        for i in 0..image_count {
            let color = GpuImage::attachment(
                self.allocator.clone(),
                format,
                extent,
                vk::SampleCountFlags::TYPE_1,
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED,
                layers,
                &format!("headless frame {}", i),
            )?;
            let views = shared.views(color.view(), None)?;
            targets.push(FrameTarget::new(
                self.device.clone(),
                &self.pass,
                &views,
                extent,
                Some(color),
                false,
            )?);
            slots.push(FrameSlot::new(self.device.clone(), self.queue.family_index(), false)?);
        }

        // Framebuffers go before the shared views they were built over
        self.targets = targets;
        self.slots = slots;
        self.shared = Some(shared);
        self.slot_color = slot_color;
        self.extent = extent;
        self.image_count = image_count;
        self.cursor.reset(image_count);

        log::info!(
            "Headless frame ring ready: {} images of {}x{} {:?}",
            image_count,
            extent.width,
            extent.height,
            format,
        );
        Ok(())
    }

    /// Color image of slot `index`, in the layout the pass left it in
    pub fn color_image(&self, index: u32) -> Option<&GpuImage> {
        self.targets
            .get(index as usize)
            .and_then(|target| target.color.as_ref())
    }

    pub fn color_image_mut(&mut self, index: u32) -> Option<&mut GpuImage> {
        self.targets
            .get_mut(index as usize)
            .and_then(|target| target.color.as_mut())
    }

    pub fn shared_targets(&self) -> Option<&SharedTargets> {
        self.shared.as_ref()
    }

    /// Blocks until every submitted frame has finished
    pub fn wait_idle(&self) -> Result<()> {
        self.queue.wait_idle(&self.device.logical)
    }
}

impl FrameRing for HeadlessFrameRing {
    fn begin_frame(&mut self) -> Result<Option<FrameContext>> {
        let index = self.cursor.acquire();
        let slot = &self.slots[index as usize];

        let started = slot
            .wait()
            .and_then(|()| slot.begin())
            .and_then(|()| slot.reset_fence());
        if let Err(e) = started {
            self.cursor.cancel();
            return Err(e);
        }

        log::trace!("Acquired headless frame {}", index);
        Ok(Some(FrameContext {
            framebuffer: self.targets[index as usize].framebuffer,
            command_buffer: slot.command_buffer,
            index,
            image_index: index,
            extent: self.extent,
        }))
    }

    fn end_frame(&mut self) -> Result<()> {
        assert!(self.cursor.is_acquired(), "no frame acquired, nothing to submit");
        let index = self.cursor.index() as usize;
        let slot = &self.slots[index];

        let submitted = slot
            .end()
            .and_then(|()| slot.submit(&self.queue, None, None));
        if let Err(e) = submitted {
            if let Err(release) = slot.release_fence(&self.queue) {
                log::error!("Failed to release fence of frame {}: {}", index, release);
            }
            self.cursor.cancel();
            return Err(e);
        }

        let final_layout = self.pass.attachments()[self.slot_color].final_layout;
        if let Some(color) = self.targets[index].color.as_mut() {
            color.note_render_pass_layout(final_layout);
        }
        self.cursor.submit();
        log::trace!("Submitted headless frame {}", index);
        Ok(())
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn color_format(&self) -> vk::Format {
        self.pass.attachments()[self.slot_color].format
    }

    fn depth_format(&self) -> Option<vk::Format> {
        self.pass.depth_format()
    }

    fn present_modes(&self) -> &[vk::PresentModeKHR] {
        &[]
    }

    fn set_present_mode(&mut self, _mode: vk::PresentModeKHR) -> Result<bool> {
        Ok(false)
    }

    fn set_image_count(&mut self, count: u32) -> Result<bool> {
        self.rebuild(self.extent, count)?;
        Ok(true)
    }

    fn update_extent(&mut self, extent: vk::Extent2D) -> Result<bool> {
        self.rebuild(extent, self.image_count)?;
        Ok(true)
    }

    fn frame_index(&self) -> u32 {
        self.cursor.index()
    }

    fn is_acquired(&self) -> bool {
        self.cursor.is_acquired()
    }
}

impl Drop for HeadlessFrameRing {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for the device before destroying the frame ring: {}", e);
        }
    }
}

fn validate_extent(extent: vk::Extent2D, max_dimension: u32) -> Result<(), ResourceError> {
    if extent.width == 0 || extent.height == 0 {
        return Err(ResourceError::InvalidExtent {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });
    }
    if extent.width > max_dimension || extent.height > max_dimension {
        return Err(ResourceError::ExtentTooLarge {
            width: extent.width,
            height: extent.height,
            max: max_dimension,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_validation() {
        let extent = |width, height| vk::Extent2D { width, height };
        assert!(validate_extent(extent(1, 1), 4096).is_ok());
        assert!(validate_extent(extent(4096, 16), 4096).is_ok());
        assert!(matches!(
            validate_extent(extent(0, 16), 4096),
            Err(ResourceError::InvalidExtent { width: 0, height: 16, depth: 1 })
        ));
        assert!(matches!(
            validate_extent(extent(16, 4097), 4096),
            Err(ResourceError::ExtentTooLarge { max: 4096, .. })
        ));
    }
}
