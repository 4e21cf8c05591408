pub mod command_executor;
pub mod device;
pub mod extensions;
pub mod instance;
pub mod queue;

use std::sync::Arc;
use color_eyre::Result;
use raw_window_handle::HasDisplayHandle;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::extensions::ExtensionLoaders;
use crate::renderer::contexts::device_ctx::instance::{RenderInstance, Surface};

/// Responsibilities:
/// - Manage the Vulkan instance, device, and queues
/// - Own the window surface when rendering on screen
/// - Hand out the extension dispatch tables
pub struct RenderDeviceContext {
    pub device: Arc<RenderDevice>,
    pub surface: Option<Arc<Surface>>,
    pub extensions: Arc<ExtensionLoaders>,
    pub instance: Arc<RenderInstance>,
}

impl RenderDeviceContext {
    pub fn new(
        config: &RenderConfig,
        window: Option<Arc<Window>>,
    ) -> Result<Self> {
        let display_handle = match window.as_ref() {
            Some(window) => Some(window.display_handle()?.as_raw()),
            None => None,
        };
        let instance = Arc::new(RenderInstance::new(config, display_handle)?);
        let extensions = Arc::new(ExtensionLoaders::new(instance.clone()));

        let surface = match window {
            Some(window) => Some(Arc::new(instance.create_surface(window, &extensions)?)),
            None => None,
        };
        let device = Arc::new(RenderDevice::new(instance.clone(), surface.as_deref())?);

        Ok(Self {
            device,
            surface,
            extensions,
            instance,
        })
    }

    pub fn headless(config: &RenderConfig) -> Result<Self> {
        Self::new(config, None)
    }
}
