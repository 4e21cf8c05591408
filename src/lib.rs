pub mod renderer;

pub use renderer::config::RenderConfig;
pub use renderer::contexts::device_ctx::RenderDeviceContext;
pub use renderer::contexts::frame_ctx::headless::HeadlessFrameRing;
pub use renderer::contexts::frame_ctx::presentable::PresentableFrameRing;
pub use renderer::contexts::frame_ctx::xr::{XrFrameRing, XrImageSource};
pub use renderer::contexts::frame_ctx::{FrameContext, FrameRing};
pub use renderer::contexts::pass_ctx::render_pass::{AttachmentInfo, ClearValue, RenderTargetPass};
pub use renderer::contexts::pass_ctx::subpass::SubPass;
pub use renderer::contexts::resource_ctx::allocator::ResourceAllocator;
pub use renderer::contexts::resource_ctx::RenderResourceContext;
pub use renderer::error::ResourceError;
pub use renderer::resources::buffer::GpuBuffer;
pub use renderer::resources::buffer_pool::{GpuBufferPool, PoolItem};
pub use renderer::resources::create_info::{MemoryClass, ResourceCreateInfo, ResourceKind, SamplerInfo};
pub use renderer::resources::image::{GpuImage, ImageKind};
pub use renderer::{Renderer, RendererRing};
