pub mod config;
pub mod contexts;
pub mod error;
pub mod resources;

use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::frame_ctx::headless::HeadlessFrameRing;
use crate::renderer::contexts::frame_ctx::presentable::{preferred_surface_format, PresentableFrameRing};
use crate::renderer::contexts::frame_ctx::FrameRing;
use crate::renderer::contexts::pass_ctx::render_pass::{AttachmentInfo, RenderTargetPass};
use crate::renderer::contexts::resource_ctx::allocator::ResourceAllocator;
use crate::renderer::contexts::resource_ctx::RenderResourceContext;

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// The frame ring a [`Renderer`] drives
pub enum RendererRing {
    Headless(HeadlessFrameRing),
    Presentable(PresentableFrameRing),
}

impl RendererRing {
    pub fn as_ring(&self) -> &dyn FrameRing {
        match self {
            RendererRing::Headless(ring) => ring,
            RendererRing::Presentable(ring) => ring,
        }
    }

    pub fn as_ring_mut(&mut self) -> &mut dyn FrameRing {
        match self {
            RendererRing::Headless(ring) => ring,
            RendererRing::Presentable(ring) => ring,
        }
    }
}

/// Bundles the device, the allocator, a clear-only render pass and the frame ring rendering
/// with it. Drawing is left to consumers recording into the frame's command buffer; `draw`
/// only clears.
pub struct Renderer {
    // Dropped in declaration order: ring before pass before allocator before device
    ring: RendererRing,
    pass: Arc<RenderTargetPass>,
    res: RenderResourceContext,
    dev: RenderDeviceContext,
    config: RenderConfig,

    resize_requested: bool,
}

impl Renderer {
    /// Renders into `window` when given, into offscreen images otherwise
    pub fn new(
        config: RenderConfig,
        window: Option<Arc<Window>>,
    ) -> Result<Self> {
        let dev = RenderDeviceContext::new(&config, window)?;
        let res = RenderResourceContext::new(&dev)?;

        let (color_format, final_layout) = match dev.surface.as_ref() {
            Some(surface) => (
                preferred_surface_format(&dev.device, surface)?.format,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
            None => (config.color_format, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
        };
        let depth_format = match config.depth_format {
            Some(format) => format,
            None => dev.device.supported_depth_format(&DEPTH_CANDIDATES)?,
        };

        let mut pass = build_pass(&config, color_format, depth_format, final_layout);
        pass.create(dev.device.clone())?;
        let pass = Arc::new(pass);

        let ring = match dev.surface.clone() {
            Some(surface) => RendererRing::Presentable(PresentableFrameRing::new(
                res.allocator.clone(),
                pass.clone(),
                surface,
                &dev.extensions,
                config.image_count,
                config.vsync,
            )?),
            None => RendererRing::Headless(HeadlessFrameRing::new(
                res.allocator.clone(),
                pass.clone(),
                config.extent,
                config.image_count,
            )?),
        };

        Ok(Self {
            ring,
            pass,
            res,
            dev,
            config,
            resize_requested: false,
        })
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Clears the next frame. `false` when the frame was skipped
    pub fn draw(&mut self) -> Result<bool> {
        if self.resize_requested {
            self.resize_requested = false;
            if let Some(surface) = self.dev.surface.as_ref() {
                self.ring.as_ring_mut().update_extent(surface.size())?;
            }
        }

        let ring = self.ring.as_ring_mut();
        let Some(frame) = ring.begin_frame()? else {
            return Ok(false);
        };

        let cmd = frame.command_buffer;
        self.pass.begin(cmd, frame.framebuffer, frame.render_area(), vk::SubpassContents::INLINE);
        for _ in 1..self.pass.subpass_count() {
            self.pass.next_subpass(cmd, vk::SubpassContents::INLINE);
        }
        self.pass.end(cmd);

        ring.end_frame()?;
        Ok(true)
    }

    pub fn ring(&self) -> &RendererRing {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut RendererRing {
        &mut self.ring
    }

    pub fn pass(&self) -> &Arc<RenderTargetPass> {
        &self.pass
    }

    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.res.allocator
    }

    pub fn device_context(&self) -> &RenderDeviceContext {
        &self.dev
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }
}

/// One subpass clearing a color target and depth, through MSAA targets resolved into the
/// frame's color image when the config asks for multisampling
fn build_pass(
    config: &RenderConfig,
    color_format: vk::Format,
    depth_format: vk::Format,
    final_layout: vk::ImageLayout,
) -> RenderTargetPass {
    let mut pass = RenderTargetPass::new();
    let samples = config.sample_count;

    if samples == vk::SampleCountFlags::TYPE_1 {
        let color = pass.add_color_attachment(color_format, samples, config.clear_color, final_layout);
        let depth = pass.add_depth_attachment(depth_format, samples, 1.0, 0);
        pass.add_subpass().color(color).depth(depth);
        return pass;
    }

    let mut msaa_color = AttachmentInfo::color(
        color_format,
        samples,
        config.clear_color,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );
    msaa_color.store_op = vk::AttachmentStoreOp::DONT_CARE;
    let msaa_color = pass.add_color_attachment_with(msaa_color);
    let depth = pass.add_depth_attachment(depth_format, samples, 1.0, 0);

    let mut resolved = AttachmentInfo::color(color_format, vk::SampleCountFlags::TYPE_1, config.clear_color, final_layout);
    resolved.load_op = vk::AttachmentLoadOp::DONT_CARE;
    resolved.resolve = true;
    let resolved = pass.add_color_attachment_with(resolved);

    pass.add_subpass().color(msaa_color).depth(depth).resolve(resolved);
    pass
}
