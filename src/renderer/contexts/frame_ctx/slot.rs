use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, Result};
use smallvec::SmallVec;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::pass_ctx::render_pass::{AttachmentInfo, RenderTargetPass};
use crate::renderer::contexts::resource_ctx::allocator::ResourceAllocator;
use crate::renderer::error::DriverResultExt;
use crate::renderer::resources::image::GpuImage;

/// Where the image behind a pass attachment comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentRole {
    /// The image the frame ends up in, one per target
    SlotColor,
    /// Single-sampled intermediate color shared by all targets
    SharedColor,
    MsaaColor,
    Depth,
    MsaaDepth,
}

/// Maps each attachment of a pass to its image source. The last single-sampled color
/// attachment is the frame's own target
pub fn attachment_roles(attachments: &[AttachmentInfo]) -> Result<SmallVec<[AttachmentRole; 6]>> {
    let slot_color = attachments
        .iter()
        .rposition(|attachment| !attachment.is_depth() && !attachment.is_multisampled())
        .ok_or_else(|| eyre!("render pass has no single-sampled color attachment to render frames into"))?;

    Ok(attachments
        .iter()
        .enumerate()
        .map(|(index, attachment)| {
            match (attachment.is_depth(), attachment.is_multisampled()) {
                (true, true) => AttachmentRole::MsaaDepth,
                (true, false) => AttachmentRole::Depth,
                (false, true) => AttachmentRole::MsaaColor,
                (false, false) if index == slot_color => AttachmentRole::SlotColor,
                (false, false) => AttachmentRole::SharedColor,
            }
        })
        .collect())
}

/// Command buffer, completion fence and (for presentation) the acquire semaphore of one
/// frame in flight
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
    pub image_available: Option<vk::Semaphore>,
    pool: vk::CommandPool,
    device: Arc<RenderDevice>,
}

impl FrameSlot {
    pub fn new(
        device: Arc<RenderDevice>,
        queue_family: u32,
        with_semaphore: bool,
    ) -> Result<Self> {
        let logical = &device.logical;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let pool = unsafe { logical.create_command_pool(&pool_info, None) }
            .driver("vkCreateCommandPool")?;

        // From here on `slot` owns everything created so far
        let mut slot = Self {
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            image_available: None,
            pool,
            device: device.clone(),
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        slot.command_buffer = unsafe { logical.allocate_command_buffers(&alloc_info) }
            .driver("vkAllocateCommandBuffers")?
            .first()
            .copied()
            .ok_or_else(|| eyre!("driver returned no command buffer"))?;

        // Signaled so the first wait on a fresh slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        slot.fence = unsafe { logical.create_fence(&fence_info, None) }.driver("vkCreateFence")?;

        if with_semaphore {
            let semaphore = unsafe { logical.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                .driver("vkCreateSemaphore")?;
            slot.image_available = Some(semaphore);
        }

        Ok(slot)
    }

    /// Blocks until the last submission of this slot has finished
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .logical
                .wait_for_fences(&[self.fence], true, u64::MAX)?;
        }
        Ok(())
    }

    pub fn reset_fence(&self) -> Result<()> {
        unsafe {
            self.device.logical.reset_fences(&[self.fence])?;
        }
        Ok(())
    }

    pub fn begin(&self) -> Result<()> {
        let logical = &self.device.logical;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            logical.reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())?;
            logical.begin_command_buffer(self.command_buffer, &begin_info)?;
        }
        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        unsafe {
            self.device.logical.end_command_buffer(self.command_buffer)?;
        }
        Ok(())
    }

    /// Submits the command buffer, signalling the slot fence on completion
    pub fn submit(
        &self,
        queue: &Queue,
        wait: Option<vk::Semaphore>,
        signal: Option<vk::Semaphore>,
    ) -> Result<()> {
        let command_buffers = [self.command_buffer];
        let wait_semaphores = wait.as_slice();
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = signal.as_slice();

        let submit = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(&wait_stages[..wait_semaphores.len()])
            .signal_semaphores(signal_semaphores);
        queue.submit(&self.device.logical, &[submit], self.fence)
    }

    /// Signals the fence without running anything, for a frame that was abandoned after its
    /// fence was reset
    pub fn release_fence(&self, queue: &Queue) -> Result<()> {
        queue.submit(&self.device.logical, &[], self.fence)
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        let logical = &self.device.logical;
        unsafe {
            if let Some(semaphore) = self.image_available.take() {
                logical.destroy_semaphore(semaphore, None);
            }
            if self.fence != vk::Fence::null() {
                logical.destroy_fence(self.fence, None);
            }
            // Frees the command buffer as well
            logical.destroy_command_pool(self.pool, None);
        }
    }
}

/// Framebuffer over one target image plus the shared attachments
pub struct FrameTarget {
    pub framebuffer: vk::Framebuffer,
    /// Set when the ring owns the target image
    pub color: Option<GpuImage>,
    /// Signalled when rendering into this target is done, consumed by present
    pub render_finished: Option<vk::Semaphore>,
    device: Arc<RenderDevice>,
}

impl FrameTarget {
    pub fn new(
        device: Arc<RenderDevice>,
        pass: &RenderTargetPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
        color: Option<GpuImage>,
        with_semaphore: bool,
    ) -> Result<Self> {
        let logical = &device.logical;
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            // Multiview renders layers through the view mask, not framebuffer layers
            .layers(1);
        let framebuffer = unsafe { logical.create_framebuffer(&framebuffer_info, None) }
            .driver("vkCreateFramebuffer")?;

        let mut target = Self {
            framebuffer,
            color,
            render_finished: None,
            device: device.clone(),
        };
        if with_semaphore {
            let semaphore = unsafe { logical.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                .driver("vkCreateSemaphore")?;
            target.render_finished = Some(semaphore);
        }
        Ok(target)
    }
}

impl Drop for FrameTarget {
    fn drop(&mut self) {
        let logical = &self.device.logical;
        unsafe {
            if let Some(semaphore) = self.render_finished.take() {
                logical.destroy_semaphore(semaphore, None);
            }
            logical.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// Attachments every target of a ring renders with: depth, MSAA targets and intermediates
pub struct SharedTargets {
    roles: SmallVec<[AttachmentRole; 6]>,
    images: Vec<Option<GpuImage>>,
}

impl SharedTargets {
    /// `external_depth` leaves the single-sampled depth attachment to the caller
    pub fn new(
        allocator: &Arc<ResourceAllocator>,
        pass: &RenderTargetPass,
        extent: vk::Extent2D,
        layers: u32,
        external_depth: bool,
    ) -> Result<Self> {
        let roles = attachment_roles(pass.attachments())?;
        let inputs = pass
            .subpasses()
            .iter()
            .flat_map(|subpass| subpass.inputs())
            .collect::<SmallVec<[u32; 8]>>();

        let mut images = Vec::with_capacity(roles.len());
        for (index, (info, role)) in pass.attachments().iter().zip(&roles).enumerate() {
            let image = match role {
                AttachmentRole::SlotColor => None,
                AttachmentRole::Depth if external_depth => None,
                _ => {
                    let usage = if inputs.contains(&(index as u32)) {
                        vk::ImageUsageFlags::INPUT_ATTACHMENT
                    } else {
                        vk::ImageUsageFlags::empty()
                    };
                    let name = format!("{:?} attachment {}", role, index);
                    Some(GpuImage::attachment(
                        allocator.clone(),
                        info.format,
                        extent,
                        info.samples,
                        usage,
                        layers,
                        &name,
                    )?)
                }
            };
            images.push(image);
        }

        Ok(Self { roles, images })
    }

    pub fn roles(&self) -> &[AttachmentRole] {
        &self.roles
    }

    pub fn image(&self, index: usize) -> Option<&GpuImage> {
        self.images.get(index).and_then(Option::as_ref)
    }

    /// Framebuffer views in pass order around the given target (and external depth) view
    pub fn views(
        &self,
        target: vk::ImageView,
        depth: Option<vk::ImageView>,
    ) -> Result<SmallVec<[vk::ImageView; 6]>> {
        self.roles
            .iter()
            .zip(&self.images)
            .enumerate()
            .map(|(index, (role, image))| match (role, image) {
                (AttachmentRole::SlotColor, _) => Ok(target),
                (_, Some(image)) => Ok(image.view()),
                (AttachmentRole::Depth, None) => {
                    depth.ok_or_else(|| eyre!("no depth view supplied for attachment {}", index))
                }
                (role, None) => Err(eyre!("{:?} attachment {} has no image", role, index)),
            })
            .collect()
    }
}
