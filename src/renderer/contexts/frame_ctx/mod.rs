pub mod cursor;
pub mod headless;
pub mod presentable;
pub mod slot;
pub mod xr;

use ash::vk;
use color_eyre::Result;

/// What the renderer records into for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    pub framebuffer: vk::Framebuffer,
    pub command_buffer: vk::CommandBuffer,
    /// Frame slot owning the command buffer and fence
    pub index: u32,
    /// Target image the framebuffer renders into. Equal to `index` unless the images come
    /// from a presentation engine or an XR runtime
    pub image_index: u32,
    pub extent: vk::Extent2D,
}

impl FrameContext {
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

/// Responsibilities:
/// - Own N frame slots, each with its targets, command buffer and completion fence
/// - Drive acquire -> record -> submit (-> present) one frame at a time
/// - Rebuild every slot when the extent or image count changes
///
/// Only one frame may be acquired at a time; acquiring twice without ending the frame in
/// between is a caller bug and asserts.
pub trait FrameRing {
    /// Waits for the next slot to be free and opens its command buffer.
    ///
    /// `None` means there is nothing to render into right now (a minimized window, for
    /// instance) and the frame should be skipped.
    fn begin_frame(&mut self) -> Result<Option<FrameContext>>;

    /// Closes and submits the command buffer of the acquired frame, presenting it where
    /// the ring has a present step
    fn end_frame(&mut self) -> Result<()>;

    fn extent(&self) -> vk::Extent2D;

    fn image_count(&self) -> u32;

    fn color_format(&self) -> vk::Format;

    fn depth_format(&self) -> Option<vk::Format>;

    /// Empty for rings without a present step
    fn present_modes(&self) -> &[vk::PresentModeKHR];

    /// `true` when `mode` is now in use
    fn set_present_mode(&mut self, mode: vk::PresentModeKHR) -> Result<bool>;

    /// `true` when the ring was rebuilt with `count` slots
    fn set_image_count(&mut self, count: u32) -> Result<bool>;

    /// `true` when the ring was rebuilt at `extent`
    fn update_extent(&mut self, extent: vk::Extent2D) -> Result<bool>;

    /// Slot the next (or currently acquired) frame uses
    fn frame_index(&self) -> u32;

    fn is_acquired(&self) -> bool;
}
