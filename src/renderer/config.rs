use ash::vk;
use glam::Vec4;

/// Contains configuration options for the renderer like the resolution, vsync, and other settings
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub app_name: String,
    /// Enables `VK_LAYER_KHRONOS_validation` and the debug messenger when the layer is installed
    pub validation: bool,
    /// FIFO when set, MAILBOX (if supported) otherwise
    pub vsync: bool,
    /// Number of frame slots. The presentable ring clamps this to the surface capabilities
    pub image_count: u32,
    /// Extent of headless targets; windowed targets follow the surface
    pub extent: vk::Extent2D,
    pub sample_count: vk::SampleCountFlags,
    pub color_format: vk::Format,
    /// `None` picks the first depth format the device supports
    pub depth_format: Option<vk::Format>,
    pub clear_color: Vec4,
    /// Views rendered per frame by the XR ring
    pub view_count: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            app_name: "kiln".into(),
            validation: cfg!(debug_assertions),
            vsync: true,
            image_count: 3,
            extent: vk::Extent2D {
                width: 512,
                height: 512,
            },
            sample_count: vk::SampleCountFlags::TYPE_1,
            color_format: vk::Format::R8G8B8A8_UNORM,
            depth_format: None,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            view_count: 2,
        }
    }
}

impl RenderConfig {
    pub fn headless(extent: vk::Extent2D, image_count: u32) -> Self {
        Self {
            extent,
            image_count,
            ..Default::default()
        }
    }
}
