use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt, Result};
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::frame_ctx::cursor::FrameCursor;
use crate::renderer::contexts::frame_ctx::slot::{AttachmentRole, FrameSlot, FrameTarget, SharedTargets};
use crate::renderer::contexts::frame_ctx::{FrameContext, FrameRing};
use crate::renderer::contexts::pass_ctx::render_pass::RenderTargetPass;
use crate::renderer::contexts::resource_ctx::allocator::ResourceAllocator;
use crate::renderer::error::ResourceError;

/// Images handed out by an XR runtime's swapchain.
///
/// Every color view covers all `view_count` layers of its image, so one multiview pass
/// renders every eye at once. The runtime owns the images; the ring only builds framebuffers
/// over the views.
pub trait XrImageSource {
    fn extent(&self) -> vk::Extent2D;

    fn view_count(&self) -> u32;

    fn color_format(&self) -> vk::Format;

    fn color_views(&self) -> &[vk::ImageView];

    /// Depth views matching `color_views` one to one, when the runtime provides depth
    fn depth_views(&self) -> Option<&[vk::ImageView]> {
        None
    }

    /// Waits for the runtime and returns the image to render the next frame into
    fn current_image_index(&mut self) -> Result<u32>;

    /// Hands the image back to the runtime after its frame was submitted
    fn release_image(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Ring over the images of an [`XrImageSource`]. The runtime picks the slot of every frame,
/// and there is no present step: the runtime composites the released images itself.
pub struct XrFrameRing<S: XrImageSource> {
    targets: Vec<FrameTarget>,
    slots: Vec<FrameSlot>,
    shared: Option<SharedTargets>,
    cursor: FrameCursor,
    extent: vk::Extent2D,

    pass: Arc<RenderTargetPass>,
    queue: Arc<Queue>,
    device: Arc<RenderDevice>,
    // Dropped after the framebuffers built over its views
    source: S,
}

impl<S: XrImageSource> XrFrameRing<S> {
    pub fn new(
        allocator: Arc<ResourceAllocator>,
        pass: Arc<RenderTargetPass>,
        source: S,
    ) -> Result<Self> {
        assert!(pass.is_finalized(), "create the render pass before building a frame ring on it");

        if pass.view_count() != source.view_count() {
            return Err(ResourceError::InvalidUsage(
                "render pass view count does not match the XR image source",
            )
                .into());
        }
        let extent = source.extent();
        if extent.width == 0 || extent.height == 0 {
            return Err(ResourceError::InvalidExtent {
                width: extent.width,
                height: extent.height,
                depth: 1,
            }
                .into());
        }

        let color_views = source.color_views();
        if color_views.is_empty() {
            return Err(eyre!("XR image source has no images"));
        }
        let depth_views = source.depth_views();
        if let Some(depth_views) = depth_views {
            if depth_views.len() != color_views.len() {
                return Err(eyre!(
                    "XR image source has {} color views but {} depth views",
                    color_views.len(),
                    depth_views.len(),
                ));
            }
        }

        let shared = SharedTargets::new(
            &allocator,
            &pass,
            extent,
            source.view_count(),
            depth_views.is_some(),
        )?;
        let slot_color = shared
            .roles()
            .iter()
            .position(|role| *role == AttachmentRole::SlotColor)
            .ok_or_eyre("render pass has no frame color attachment")?;
        if pass.attachments()[slot_color].format != source.color_format() {
            return Err(ResourceError::InvalidUsage(
                "XR image source color format differs from the render pass",
            )
                .into());
        }

        let device = allocator.device().clone();
        let queue = device.graphics_queue().clone();
        let mut targets = Vec::with_capacity(color_views.len());
        let mut slots = Vec::with_capacity(color_views.len());
        for (i, &color_view) in color_views.iter().enumerate() {
            let depth_view = depth_views.map(|views| views[i]);
            let views = shared.views(color_view, depth_view)?;
            targets.push(FrameTarget::new(device.clone(), &pass, &views, extent, None, false)?);
            slots.push(FrameSlot::new(device.clone(), queue.family_index(), false)?);
        }

        let image_count = targets.len() as u32;
        log::info!(
            "XR frame ring ready: {} images of {}x{} with {} views",
            image_count,
            extent.width,
            extent.height,
            source.view_count(),
        );

        Ok(Self {
            targets,
            slots,
            shared: Some(shared),
            cursor: FrameCursor::new(image_count),
            extent,
            pass,
            queue,
            device,
            source,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn shared_targets(&self) -> Option<&SharedTargets> {
        self.shared.as_ref()
    }

    pub fn view_count(&self) -> u32 {
        self.source.view_count()
    }
}

/// Returns an image the runtime handed out for a frame that never got submitted
fn give_back_image<S: XrImageSource>(source: &mut S) {
    if let Err(e) = source.release_image() {
        log::error!("Failed to release XR image after an aborted frame: {}", e);
    }
}

impl<S: XrImageSource> FrameRing for XrFrameRing<S> {
    fn begin_frame(&mut self) -> Result<Option<FrameContext>> {
        assert!(
            !self.cursor.is_acquired(),
            "frame already acquired, end it before acquiring the next one"
        );
        let image_index = self.source.current_image_index()?;
        if image_index as usize >= self.slots.len() {
            give_back_image(&mut self.source);
            return Err(eyre!(
                "XR runtime returned image {} but only {} exist",
                image_index,
                self.slots.len(),
            ));
        }

        let index = self.cursor.acquire_at(image_index);
        let slot = &self.slots[index as usize];
        let started = slot
            .wait()
            .and_then(|()| slot.begin())
            .and_then(|()| slot.reset_fence());
        if let Err(e) = started {
            self.cursor.cancel();
            give_back_image(&mut self.source);
            return Err(e);
        }

        log::trace!("Acquired XR image {}", index);
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
                log::error!("Failed to release fence of XR frame {}: {}", index, release);
            }
            self.cursor.cancel();
            give_back_image(&mut self.source);
            return Err(e);
        }
        self.cursor.submit();
        log::trace!("Submitted XR image {}", index);
        self.source.release_image()
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.targets.len() as u32
    }

    fn color_format(&self) -> vk::Format {
        self.source.color_format()
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

    /// The runtime owns the image count
    fn set_image_count(&mut self, _count: u32) -> Result<bool> {
        Ok(false)
    }

    /// The runtime owns the extent
    fn update_extent(&mut self, _extent: vk::Extent2D) -> Result<bool> {
        Ok(false)
    }

    fn frame_index(&self) -> u32 {
        self.cursor.index()
    }

    fn is_acquired(&self) -> bool {
        self.cursor.is_acquired()
    }
}

impl<S: XrImageSource> Drop for XrFrameRing<S> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for the device before destroying the XR frame ring: {}", e);
        }
    }
}
