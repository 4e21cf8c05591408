use std::hash::Hash;
use std::sync::Mutex;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;

/// What a queue is used for. Several roles may resolve to the same queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Compute,
    Transfer,
    Present,
}

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
    // vkQueueSubmit and vkQueuePresentKHR need external synchronization
    submit_lock: Mutex<()>,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
            submit_lock: Mutex::new(()),
        }
    }

    pub fn family_index(&self) -> u32 {
        self.family.index
    }

    pub fn submit(
        &self,
        device: &ash::Device,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<()> {
        let _guard = self.submit_lock.lock().map_err(|e| eyre!(e.to_string()))?;
        unsafe {
            device.queue_submit(self.handle, submits, fence)?;
        }
        Ok(())
    }

    /// Returns `Ok(true)` when the swapchain is suboptimal
    pub fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        present_info: &vk::PresentInfoKHR,
    ) -> Result<bool, vk::Result> {
        let _guard = self.submit_lock.lock().map_err(|_| vk::Result::ERROR_UNKNOWN)?;
        unsafe { swapchain_loader.queue_present(self.handle, present_info) }
    }

    pub fn wait_idle(&self, device: &ash::Device) -> Result<()> {
        let _guard = self.submit_lock.lock().map_err(|e| eyre!(e.to_string()))?;
        unsafe {
            device.queue_wait_idle(self.handle)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
    supports_present: bool,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
        supports_present: bool
    ) -> Self {
        Self {
            index,
            properties,
            supports_present,
        }
    }

    pub fn supports_present(&self) -> bool {
        self.supports_present
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn supports_compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }

    pub fn supports_transfer(&self) -> bool {
        // Graphics and compute queues implicitly accept transfer commands
        self.properties.queue_flags.intersects(
            vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
    }
}

impl PartialEq for QueueFamily {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for QueueFamily {}

impl Hash for QueueFamily {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn family(index: u32, flags: vk::QueueFlags) -> QueueFamily {
        let properties = vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        };
        QueueFamily::new(index, properties, false)
    }

    #[test]
    fn test_families_compare_by_index() {
        let a = family(0, vk::QueueFlags::GRAPHICS);
        let b = family(0, vk::QueueFlags::COMPUTE);
        let c = family(1, vk::QueueFlags::GRAPHICS);
        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_graphics_family_accepts_transfers() {
        let graphics = family(0, vk::QueueFlags::GRAPHICS);
        assert!(graphics.supports_graphics());
        assert!(graphics.supports_transfer());
        assert!(!graphics.supports_compute());
        assert!(!graphics.supports_present());
    }
}
