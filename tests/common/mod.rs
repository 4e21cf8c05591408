use std::sync::Arc;
use kiln::{RenderConfig, RenderDeviceContext, RenderResourceContext, ResourceAllocator};

/// A headless device plus its allocator, or nothing when the machine has no Vulkan driver
pub struct GpuTestContext {
    pub resources: RenderResourceContext,
    pub device: RenderDeviceContext,
}

impl GpuTestContext {
    pub fn new() -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        let config = RenderConfig {
            validation: false,
            ..Default::default()
        };
        let device = match RenderDeviceContext::headless(&config) {
            Ok(device) => device,
            Err(e) => {
                eprintln!("no Vulkan device available: {e}");
                return None;
            }
        };
        let resources = RenderResourceContext::new(&device).ok()?;
        Some(Self { resources, device })
    }

    pub fn allocator(&self) -> Arc<ResourceAllocator> {
        self.resources.allocator.clone()
    }
}

/// Bails out of a test when there is no GPU to run it on
macro_rules! gpu_context {
    () => {
        match common::GpuTestContext::new() {
            Some(ctx) => ctx,
            None => {
                eprintln!("skipping: no GPU");
                return;
            }
        }
    };
}
