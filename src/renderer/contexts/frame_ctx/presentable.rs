use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt, Result};
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::extensions::ExtensionLoaders;
use crate::renderer::contexts::device_ctx::instance::Surface;
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueRole};
use crate::renderer::contexts::frame_ctx::cursor::FrameCursor;
use crate::renderer::contexts::frame_ctx::slot::{attachment_roles, AttachmentRole, FrameSlot, FrameTarget, SharedTargets};
use crate::renderer::contexts::frame_ctx::{FrameContext, FrameRing};
use crate::renderer::contexts::pass_ctx::render_pass::RenderTargetPass;
use crate::renderer::contexts::resource_ctx::allocator::ResourceAllocator;
use crate::renderer::error::{DriverResultExt, ResourceError};

/// Picks B8G8R8A8_SRGB / SRGB_NONLINEAR when offered, the first listed format otherwise
pub fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Surface format a presentable ring on `surface` should render in
pub fn preferred_surface_format(
    device: &RenderDevice,
    surface: &Surface,
) -> Result<vk::SurfaceFormatKHR> {
    let formats = unsafe {
        surface
            .loader()
            .get_physical_device_surface_formats(device.physical, surface.handle)
    }
    .driver("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
    pick_surface_format(&formats).ok_or_eyre("surface reports no formats")
}

/// FIFO under vsync, otherwise the lowest latency mode available
pub fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `max_image_count == 0` means the surface has no upper limit
pub fn clamp_image_count(requested: u32, caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = requested.max(caps.min_image_count);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// The surface dictates the extent unless it reports `u32::MAX`, in which case the requested
/// extent is clamped to what the surface allows. A zero requested extent stays zero
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    if requested.width == 0 || requested.height == 0 {
        return vk::Extent2D::default();
    }
    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// A ring with no slots (failed rebuild), a pending resize or a suspended surface rebuilds
/// before acquiring
fn rebuild_pending(suspended: bool, needs_resize: bool, slot_count: usize) -> bool {
    suspended || needs_resize || slot_count == 0
}

/// On-screen ring backed by a `VK_KHR_swapchain` swapchain.
///
/// Frame slots (fence, command buffer, acquire semaphore) rotate independently of the
/// swapchain images (framebuffer, render-finished semaphore); the image used by a frame is
/// whatever the presentation engine hands out.
pub struct PresentableFrameRing {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    targets: Vec<FrameTarget>,
    slots: Vec<FrameSlot>,
    shared: Option<SharedTargets>,
    cursor: FrameCursor,
    acquired_image: Option<u32>,
    /// Slot that last rendered into each swapchain image
    image_owner: Vec<Option<usize>>,
    needs_resize: bool,
    /// Set while the surface has a zero extent (minimized window)
    suspended: bool,

    surface_format: vk::SurfaceFormatKHR,
    present_modes: Vec<vk::PresentModeKHR>,
    present_mode: vk::PresentModeKHR,
    requested_image_count: u32,
    image_count: u32,
    requested_extent: vk::Extent2D,
    extent: vk::Extent2D,

    pass: Arc<RenderTargetPass>,
    allocator: Arc<ResourceAllocator>,
    surface: Arc<Surface>,
    swapchain_loader: ash::khr::swapchain::Device,
    graphics_queue: Arc<Queue>,
    present_queue: Arc<Queue>,
    device: Arc<RenderDevice>,
}

impl PresentableFrameRing {
    pub fn new(
        allocator: Arc<ResourceAllocator>,
        pass: Arc<RenderTargetPass>,
        surface: Arc<Surface>,
        extensions: &ExtensionLoaders,
        image_count: u32,
        vsync: bool,
    ) -> Result<Self> {
        assert!(pass.is_finalized(), "create the render pass before building a frame ring on it");

        let device = allocator.device().clone();
        let graphics_queue = device.graphics_queue().clone();
        let present_queue = device.queue(QueueRole::Present)?.clone();
        let swapchain_loader = extensions.swapchain(&device).clone();

        let roles = attachment_roles(pass.attachments())?;
        let slot_color = roles
            .iter()
            .position(|role| *role == AttachmentRole::SlotColor)
            .ok_or_eyre("render pass has no frame color attachment")?;
        let wanted = pass.attachments()[slot_color].format;

        let formats = unsafe {
            surface
                .loader()
                .get_physical_device_surface_formats(device.physical, surface.handle)
        }
        .driver("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let surface_format = formats
            .iter()
            .copied()
            .find(|format| format.format == wanted)
            .ok_or(ResourceError::InvalidUsage(
                "surface cannot present the render pass color format",
            ))?;

        let present_modes = unsafe {
            surface
                .loader()
                .get_physical_device_surface_present_modes(device.physical, surface.handle)
        }
        .driver("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
        let present_mode = choose_present_mode(&present_modes, vsync);

        let requested_extent = surface.size();
        let mut ring = Self {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            targets: Vec::new(),
            slots: Vec::new(),
            shared: None,
            cursor: FrameCursor::new(image_count.max(1)),
            acquired_image: None,
            image_owner: Vec::new(),
            needs_resize: false,
            suspended: false,
            surface_format,
            present_modes,
            present_mode,
            requested_image_count: image_count,
            image_count,
            requested_extent,
            extent: requested_extent,
            pass,
            allocator,
            surface,
            swapchain_loader,
            graphics_queue,
            present_queue,
            device,
        };
        ring.apply()?;
        Ok(ring)
    }

    /// Recreates the swapchain and every slot from the current surface capabilities.
    ///
    /// A zero-sized surface suspends the ring instead; frames are skipped until a later
    /// `apply` finds a usable extent.
    pub fn apply(&mut self) -> Result<()> {
        assert!(!self.cursor.is_acquired(), "cannot rebuild the frame ring while a frame is acquired");
        self.device.wait_idle()?;
        self.release_frames();
        self.needs_resize = false;

        if let Err(e) = self.rebuild() {
            // Half-built frames are dropped; the next frame starts another rebuild
            self.release_frames();
            self.needs_resize = true;
            return Err(e);
        }
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        let caps = unsafe {
            self.surface
                .loader()
                .get_physical_device_surface_capabilities(self.device.physical, self.surface.handle)
        }
        .driver("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

        let extent = choose_extent(&caps, self.requested_extent);
        if extent.width == 0 || extent.height == 0 {
            if !self.suspended {
                log::debug!("Surface has a zero extent, suspending frames");
            }
            self.suspended = true;
            return Ok(());
        }
        self.suspended = false;

        let min_image_count = clamp_image_count(self.requested_image_count, &caps);
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };
        let mut image_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if caps.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            image_usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        let families = [
            self.graphics_queue.family_index(),
            self.present_queue.family_index(),
        ];
        let old_swapchain = self.swapchain;
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle)
            .min_image_count(min_image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_usage(image_usage)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain);
        let swapchain_info = if families[0] != families[1] {
            swapchain_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            swapchain_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&swapchain_info, None) }
            .driver("vkCreateSwapchainKHR")?;
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader.destroy_swapchain(old_swapchain, None);
            }
        }
        self.swapchain = swapchain;
        self.extent = extent;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .driver("vkGetSwapchainImagesKHR")?;
        for &image in &self.images {
            let view = self.allocator.create_image_view(
                image,
                vk::ImageViewType::TYPE_2D,
                self.surface_format.format,
                vk::ImageAspectFlags::COLOR,
                1,
                1,
            )?;
            self.image_views.push(view);
        }
        self.image_count = self.images.len() as u32;

        let shared = SharedTargets::new(&self.allocator, &self.pass, extent, self.pass.view_count(), false)?;
        for &view in &self.image_views {
            let views = shared.views(view, None)?;
            self.targets.push(FrameTarget::new(
                self.device.clone(),
                &self.pass,
                &views,
                extent,
                None,
                true,
            )?);
        }
        for _ in 0..self.image_count {
            self.slots.push(FrameSlot::new(
                self.device.clone(),
                self.graphics_queue.family_index(),
                true,
            )?);
        }
        self.shared = Some(shared);
        self.image_owner = vec![None; self.images.len()];
        self.cursor.reset(self.image_count);

        log::info!(
            "Swapchain ready: {} images of {}x{} {:?}, {:?}",
            self.image_count,
            extent.width,
            extent.height,
            self.surface_format.format,
            self.present_mode,
        );
        Ok(())
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Drops everything that depends on the swapchain images, keeping the swapchain itself
    /// so it can be handed over as `old_swapchain`
    fn release_frames(&mut self) {
        self.targets.clear();
        self.slots.clear();
        self.shared = None;
        self.image_owner.clear();
        for view in self.image_views.drain(..) {
            self.allocator.destroy_image_view(view);
        }
        self.images.clear();
    }

    /// `None` when the swapchain is out of date
    fn acquire_image(&mut self) -> Result<Option<u32>> {
        let slot = &self.slots[self.cursor.index() as usize];
        slot.wait()?;
        let semaphore = slot
            .image_available
            .ok_or_eyre("presentable frame slot has no acquire semaphore")?;

        let acquired = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Swapchain is suboptimal, resizing after present");
                    self.needs_resize = true;
                }
                Ok(Some(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on acquire");
                Ok(None)
            }
            Err(result) => Err(ResourceError::Driver {
                what: "vkAcquireNextImageKHR",
                result,
            }
                .into()),
        }
    }
}

impl FrameRing for PresentableFrameRing {
    fn begin_frame(&mut self) -> Result<Option<FrameContext>> {
        assert!(
            !self.cursor.is_acquired(),
            "frame already acquired, end it before acquiring the next one"
        );
        if rebuild_pending(self.suspended, self.needs_resize, self.slots.len()) {
            self.apply()?;
            if self.suspended {
                return Ok(None);
            }
        }

        let image_index = match self.acquire_image()? {
            Some(index) => index,
            None => {
                self.apply()?;
                if self.suspended {
                    return Ok(None);
                }
                match self.acquire_image()? {
                    Some(index) => index,
                    None => {
                        log::warn!("Swapchain still out of date after rebuilding, skipping frame");
                        self.needs_resize = true;
                        return Ok(None);
                    }
                }
            }
        };

        let index = self.cursor.acquire() as usize;
        let owner = self.image_owner[image_index as usize];
        let slot = &self.slots[index];
        // The fence is reset last so a failed start leaves it signaled
        let started = match owner {
            Some(owner) if owner != index => self.slots[owner].wait(),
            _ => Ok(()),
        }
        .and_then(|()| slot.begin())
        .and_then(|()| slot.reset_fence());
        if let Err(e) = started {
            // The acquired image and its signaled semaphore are abandoned, so the next frame
            // rebuilds the swapchain
            self.cursor.cancel();
            self.needs_resize = true;
            return Err(e);
        }

        self.image_owner[image_index as usize] = Some(index);
        self.acquired_image = Some(image_index);
        log::trace!("Acquired swapchain image {} for frame {}", image_index, index);
        Ok(Some(FrameContext {
            framebuffer: self.targets[image_index as usize].framebuffer,
            command_buffer: slot.command_buffer,
            index: index as u32,
            image_index,
            extent: self.extent,
        }))
    }

    fn end_frame(&mut self) -> Result<()> {
        assert!(self.cursor.is_acquired(), "no frame acquired, nothing to submit");
        let index = self.cursor.index() as usize;
        let image_index = self
            .acquired_image
            .take()
            .ok_or_else(|| eyre!("frame {} has no swapchain image", index))?;

        let slot = &self.slots[index];
        let render_finished = self.targets[image_index as usize].render_finished;
        let submitted = slot
            .end()
            .and_then(|()| slot.submit(&self.graphics_queue, slot.image_available, render_finished));
        if let Err(e) = submitted {
            if let Err(release) = slot.release_fence(&self.graphics_queue) {
                log::error!("Failed to release fence of frame {}: {}", index, release);
            }
            self.cursor.cancel();
            self.needs_resize = true;
            return Err(e);
        }
        self.cursor.submit();

        let wait_semaphores = render_finished.as_slice();
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        match self.present_queue.present(&self.swapchain_loader, &present_info) {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date or suboptimal on present");
                self.needs_resize = true;
            }
            Err(result) => {
                return Err(ResourceError::Driver {
                    what: "vkQueuePresentKHR",
                    result,
                }
                    .into())
            }
        }
        log::trace!("Presented swapchain image {} from frame {}", image_index, index);

        if self.needs_resize {
            self.apply()?;
        }
        Ok(())
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn color_format(&self) -> vk::Format {
        self.surface_format.format
    }

    fn depth_format(&self) -> Option<vk::Format> {
        self.pass.depth_format()
    }

    fn present_modes(&self) -> &[vk::PresentModeKHR] {
        &self.present_modes
    }

    fn set_present_mode(&mut self, mode: vk::PresentModeKHR) -> Result<bool> {
        let supported = self.present_modes.contains(&mode);
        let mode = if supported {
            mode
        } else {
            log::warn!("Present mode {:?} is not supported by the surface, using FIFO", mode);
            vk::PresentModeKHR::FIFO
        };
        if mode != self.present_mode {
            self.present_mode = mode;
            self.apply()?;
        }
        Ok(supported)
    }

    fn set_image_count(&mut self, count: u32) -> Result<bool> {
        self.requested_image_count = count;
        self.apply()?;
        Ok(!self.suspended && self.image_count == count)
    }

    fn update_extent(&mut self, extent: vk::Extent2D) -> Result<bool> {
        self.requested_extent = extent;
        self.apply()?;
        Ok(!self.suspended)
    }

    fn frame_index(&self) -> u32 {
        self.cursor.index()
    }

    fn is_acquired(&self) -> bool {
        self.cursor.is_acquired()
    }
}

impl Drop for PresentableFrameRing {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for the device before destroying the swapchain: {}", e);
        }
        self.release_frames();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn test_present_mode_selection() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_image_count_clamped_to_surface() {
        let bounded = caps(2, 3, UNDEFINED_EXTENT);
        assert_eq!(clamp_image_count(1, &bounded), 2);
        assert_eq!(clamp_image_count(3, &bounded), 3);
        assert_eq!(clamp_image_count(8, &bounded), 3);

        let unbounded = caps(2, 0, UNDEFINED_EXTENT);
        assert_eq!(clamp_image_count(8, &unbounded), 8);
    }

    #[test]
    fn test_extent_follows_surface() {
        let fixed = caps(2, 3, vk::Extent2D { width: 800, height: 600 });
        let requested = vk::Extent2D { width: 1024, height: 768 };
        assert_eq!(choose_extent(&fixed, requested), vk::Extent2D { width: 800, height: 600 });

        let free = caps(2, 3, UNDEFINED_EXTENT);
        assert_eq!(choose_extent(&free, requested), requested);
        assert_eq!(
            choose_extent(&free, vk::Extent2D { width: 10_000, height: 20 }),
            vk::Extent2D { width: 4096, height: 20 }
        );
        assert_eq!(
            choose_extent(&free, vk::Extent2D { width: 640, height: 0 }),
            vk::Extent2D::default()
        );
    }

    #[test]
    fn test_rebuild_before_acquire() {
        assert!(!rebuild_pending(false, false, 3));
        assert!(rebuild_pending(true, false, 0));
        assert!(rebuild_pending(false, true, 3));
        // Slots lost to a failed rebuild are never indexed
        assert!(rebuild_pending(false, false, 0));
    }

    #[test]
    fn test_surface_format_preference() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(pick_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(pick_surface_format(&[unorm]), Some(unorm));
        assert_eq!(pick_surface_format(&[]), None);
    }
}
