pub mod allocator;
pub mod format;
pub mod layout;
pub mod mip;

use std::sync::Arc;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::resource_ctx::allocator::ResourceAllocator;

/// Responsibilities:
/// - Own the device memory allocator
/// - Move data between the host and buffers or images
/// - Drive image layout transitions and mip generation
pub struct RenderResourceContext {
    pub allocator: Arc<ResourceAllocator>,
}

impl RenderResourceContext {
    pub fn new(device_ctx: &RenderDeviceContext) -> Result<Self> {
        let allocator = Arc::new(ResourceAllocator::new(device_ctx.device.clone())?);
        Ok(Self { allocator })
    }
}
