use std::collections::BTreeMap;
use std::ffi::{c_char, CStr};
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::instance::{RenderInstance, Surface};
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueFamily, QueueRole};

/// Selected adapter plus the logical device and its queues
pub struct RenderDevice {
    pub logical: ash::Device,
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,

    graphics_queue: Arc<Queue>,
    compute_queue: Arc<Queue>,
    transfer_queue: Arc<Queue>,
    present_queue: Option<Arc<Queue>>,

    sampler_anisotropy: bool,
    multiview: bool,

    instance: Arc<RenderInstance>,
}

impl RenderDevice {
    pub fn new(
        instance: Arc<RenderInstance>,
        surface: Option<&Surface>,
    ) -> Result<Self> {
        let (physical_device, selection) = Self::select_physical_device(&instance.instance, surface)?;

        let properties = unsafe {
            instance.instance.get_physical_device_properties(physical_device)
        };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!(
            "Selected {} ({:?}), queue families: graphics {}, compute {}, transfer {}, present {:?}",
            name,
            properties.device_type,
            selection.graphics.index,
            selection.compute.index,
            selection.transfer.index,
            selection.present.as_ref().map(|family| family.index),
        );

        let mut enabled_features = EnabledFeatures::new(&physical_device, &instance.instance);
        let (logical_device, queues) = Self::create_logical_device(
            &instance.instance,
            &physical_device,
            &selection,
            &mut enabled_features,
            surface.is_some(),
        )?;

        let queue_for = |family: &QueueFamily| {
            queues
                .get(&family.index)
                .cloned()
                .ok_or_eyre("Queue family was not created with the device")
        };
        let graphics_queue = queue_for(&selection.graphics)?;
        let compute_queue = queue_for(&selection.compute)?;
        let transfer_queue = queue_for(&selection.transfer)?;
        let present_queue = selection.present.as_ref().map(queue_for).transpose()?;

        Ok(Self {
            logical: logical_device,
            physical: physical_device,
            properties,

            graphics_queue,
            compute_queue,
            transfer_queue,
            present_queue,

            sampler_anisotropy: enabled_features.features.sampler_anisotropy == vk::TRUE,
            multiview: enabled_features.multiview.multiview == vk::TRUE,

            instance,
        })
    }

    pub fn instance(&self) -> &Arc<RenderInstance> {
        &self.instance
    }

    pub fn queue(&self, role: QueueRole) -> Result<&Arc<Queue>> {
        match role {
            QueueRole::Graphics => Ok(&self.graphics_queue),
            QueueRole::Compute => Ok(&self.compute_queue),
            QueueRole::Transfer => Ok(&self.transfer_queue),
            QueueRole::Present => self
                .present_queue
                .as_ref()
                .ok_or_eyre("Device was created without a surface, no present queue"),
        }
    }

    pub fn graphics_queue(&self) -> &Arc<Queue> {
        &self.graphics_queue
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical, format)
        }
    }

    /// First candidate usable as an optimally tiled depth/stencil attachment
    pub fn supported_depth_format(&self, candidates: &[vk::Format]) -> Result<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|format| {
                self.format_properties(*format)
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or_else(|| eyre!("None of the depth formats {:?} are supported", candidates))
    }

    /// `None` when anisotropic filtering was not enabled on this device
    pub fn max_sampler_anisotropy(&self) -> Option<f32> {
        self.sampler_anisotropy
            .then_some(self.properties.limits.max_sampler_anisotropy)
    }

    pub fn supports_multiview(&self) -> bool {
        self.multiview
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: Option<&Surface>,
    ) -> Result<(vk::PhysicalDevice, QueueSelection)> {
        let req_device_exts = Self::get_required_device_extensions(surface.is_some());

        unsafe {
            instance
                .enumerate_physical_devices()?
                .into_iter()
                // Filter out devices that are too old for the 1.1 feature queries
                .filter(|device| {
                    let props = instance.get_physical_device_properties(*device);
                    props.api_version >= vk::API_VERSION_1_1
                })
                // Filter out devices that do not contain the required device extensions
                .filter(|device| {
                    let supported_extensions = instance
                        .enumerate_device_extension_properties(*device)
                        .unwrap_or_default();

                    req_device_exts.iter().all(|req_ext| {
                        let req_ext_supported = supported_extensions
                            .iter()
                            .filter_map(|sup_ext| sup_ext.extension_name_as_c_str().ok())
                            .any(|sup_ext| sup_ext == *req_ext);
                        if !req_ext_supported {
                            log::debug!("Device extension not supported: {:?}", req_ext);
                        }
                        req_ext_supported
                    })
                })
                // Filter out devices that do not contain the required queues
                .filter_map(|device| {
                    let props = instance.get_physical_device_queue_family_properties(device);
                    pick_queue_families(
                        &props,
                        |index| surface.is_some_and(|surface| surface.supports_present(device, index)),
                        surface.is_some(),
                    )
                        .map(|selection| (device, selection))
                })
                .min_by_key(|(device, _)| {
                    let props = instance.get_physical_device_properties(*device);
                    match props.device_type {
                        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                        vk::PhysicalDeviceType::CPU => 3,
                        vk::PhysicalDeviceType::OTHER => 4,
                        _ => 5,
                    }
                })
                .ok_or_eyre("No suitable physical device found")
        }
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: &vk::PhysicalDevice,
        selection: &QueueSelection,
        enabled_features: &mut EnabledFeatures,
        presentable: bool,
    ) -> Result<(ash::Device, BTreeMap<u32, Arc<Queue>>)> {
        // One create info per distinct family, roles that share a family share the queue
        let families = selection.distinct_families();
        let queue_priorities = [1.0];
        let queue_create_infos = families
            .values()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family.index)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        // Create device
        let device = {
            let enabled_extension_names = Self::get_required_device_extensions(presentable)
                .iter()
                .map(|ext| ext.as_ptr())
                .collect::<Vec<*const c_char>>();

            let device_create_info = enabled_features.device_create_info()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&enabled_extension_names);

            unsafe {
                instance.create_device(*physical_device, &device_create_info, None)?
            }
        };

        let queues = families
            .into_iter()
            .map(|(index, family)| {
                let queue = unsafe { device.get_device_queue(index, 0) };
                (index, Arc::new(Queue::new(family, queue)))
            })
            .collect();

        Ok((device, queues))
    }

    fn get_required_device_extensions(presentable: bool) -> Vec<&'static CStr> {
        let mut exts = Vec::new();
        if presentable {
            exts.push(ash::khr::swapchain::NAME);
        }

        #[cfg(target_os = "macos")]
        exts.push(ash::khr::portability_subset::NAME);

        exts
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.logical.device_wait_idle() {
                log::error!("Failed to wait for device idle before destruction: {}", e);
            }
            self.logical.destroy_device(None);
        }
    }
}

/// Queue families picked for each role
#[derive(Debug, Clone)]
pub struct QueueSelection {
    pub graphics: QueueFamily,
    pub compute: QueueFamily,
    pub transfer: QueueFamily,
    pub present: Option<QueueFamily>,
}

impl QueueSelection {
    fn distinct_families(&self) -> BTreeMap<u32, QueueFamily> {
        [&self.graphics, &self.compute, &self.transfer]
            .into_iter()
            .chain(self.present.as_ref())
            .map(|family| (family.index, family.clone()))
            .collect()
    }
}

/// Graphics is mandatory, present is mandatory when `want_present` is set.
/// Compute and transfer prefer dedicated families and fall back to graphics.
fn pick_queue_families(
    props: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
    want_present: bool,
) -> Option<QueueSelection> {
    let families = props
        .iter()
        .enumerate()
        .filter(|(_, props)| props.queue_count > 0)
        .map(|(i, props)| QueueFamily::new(i as u32, *props, want_present && supports_present(i as u32)))
        .collect::<Vec<_>>();

    let graphics = families
        .iter()
        .find(|family| family.supports_graphics() && (!want_present || family.supports_present()))
        .or_else(|| families.iter().find(|family| family.supports_graphics()))?
        .clone();

    let present = if want_present {
        let family = if graphics.supports_present() {
            graphics.clone()
        } else {
            families.iter().find(|family| family.supports_present())?.clone()
        };
        Some(family)
    } else {
        None
    };

    let compute = families
        .iter()
        .find(|family| family.supports_compute() && !family.supports_graphics())
        .or_else(|| families.iter().find(|family| family.supports_compute()))
        .unwrap_or(&graphics)
        .clone();

    let transfer = families
        .iter()
        .find(|family| {
            family.supports_transfer() && !family.supports_graphics() && !family.supports_compute()
        })
        .or_else(|| {
            families
                .iter()
                .find(|family| family.supports_transfer() && !family.supports_graphics())
        })
        .unwrap_or(&graphics)
        .clone();

    Some(QueueSelection {
        graphics,
        compute,
        transfer,
        present,
    })
}

struct EnabledFeatures<'a> {
    features: vk::PhysicalDeviceFeatures,
    multiview: vk::PhysicalDeviceMultiviewFeatures<'a>,
}

impl EnabledFeatures<'_> {
    fn new(
        physical_device: &vk::PhysicalDevice,
        instance: &ash::Instance,
    ) -> Self {
        let supported = unsafe {
            instance.get_physical_device_features(*physical_device)
        };
        let mut supported_multiview = vk::PhysicalDeviceMultiviewFeatures::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut supported_multiview);
            unsafe {
                instance.get_physical_device_features2(*physical_device, &mut features2);
            }
        }

        // Only optional features the resource and frame layers make use of
        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE);
        let multiview = vk::PhysicalDeviceMultiviewFeatures::default()
            .multiview(supported_multiview.multiview == vk::TRUE);

        Self {
            features,
            multiview,
        }
    }

    fn device_create_info(&mut self) -> vk::DeviceCreateInfo<'_> {
        vk::DeviceCreateInfo::default()
            .enabled_features(&self.features)
            .push_next(&mut self.multiview)
    }
}
