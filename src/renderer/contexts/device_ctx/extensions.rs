use std::sync::{Arc, OnceLock};
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;

/// Dispatch tables for the window-system extensions.
///
/// Each table is loaded the first time it is asked for and lives as long as this struct.
/// One instance is owned by the device context and handed by reference to whatever needs
/// extension entry points, so there is no global function-pointer state.
pub struct ExtensionLoaders {
    surface: OnceLock<ash::khr::surface::Instance>,
    swapchain: OnceLock<ash::khr::swapchain::Device>,
    instance: Arc<RenderInstance>,
}

impl ExtensionLoaders {
    pub fn new(instance: Arc<RenderInstance>) -> Self {
        Self {
            surface: OnceLock::new(),
            swapchain: OnceLock::new(),
            instance,
        }
    }

    pub fn surface(&self) -> &ash::khr::surface::Instance {
        self.surface.get_or_init(|| {
            log::debug!("Loading VK_KHR_surface entry points");
            ash::khr::surface::Instance::new(&self.instance.entry, &self.instance.instance)
        })
    }

    /// The swapchain table is device-level, so it binds to the first device that asks for it
    pub fn swapchain(&self, device: &RenderDevice) -> &ash::khr::swapchain::Device {
        self.swapchain.get_or_init(|| {
            log::debug!("Loading VK_KHR_swapchain entry points");
            ash::khr::swapchain::Device::new(&self.instance.instance, &device.logical)
        })
    }
}
