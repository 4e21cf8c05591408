use ash::vk;
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::error::ResourceError;

/// Where the memory backing a resource lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClass {
    /// GPU-only memory, written through a staging copy
    DeviceLocal,
    /// Persistently mapped memory the host writes directly
    HostVisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerInfo {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    /// Clamped to the device limit, ignored when the device lacks anisotropic filtering
    pub max_anisotropy: Option<f32>,
    pub max_lod: f32,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: Some(16.0),
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

/// Everything needed to materialize a buffer or an image.
///
/// Immutable once built, use [`ResourceCreateInfo::image`] or [`ResourceCreateInfo::buffer`]
/// to obtain a builder.
#[derive(Debug, Clone)]
pub struct ResourceCreateInfo<'a> {
    kind: ResourceKind,
    extent: vk::Extent3D,
    size: u64,
    format: vk::Format,
    image_usage: vk::ImageUsageFlags,
    buffer_usage: vk::BufferUsageFlags,
    memory_class: MemoryClass,
    layer_data: SmallVec<[&'a [u8]; 6]>,
    generate_mips: bool,
    layer_count: u32,
    samples: vk::SampleCountFlags,
    flags: vk::ImageCreateFlags,
    image_type: vk::ImageType,
    tiling: vk::ImageTiling,
    name: String,
}

impl<'a> ResourceCreateInfo<'a> {
    pub fn image(format: vk::Format, extent: vk::Extent3D) -> ResourceCreateInfoBuilder<'a> {
        let image_type = if extent.depth > 1 {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        };
        ResourceCreateInfoBuilder {
            info: Self {
                kind: ResourceKind::Image,
                extent,
                size: 0,
                format,
                image_usage: vk::ImageUsageFlags::empty(),
                buffer_usage: vk::BufferUsageFlags::empty(),
                memory_class: MemoryClass::DeviceLocal,
                layer_data: SmallVec::new(),
                generate_mips: false,
                layer_count: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                flags: vk::ImageCreateFlags::empty(),
                image_type,
                tiling: vk::ImageTiling::OPTIMAL,
                name: "image".into(),
            },
        }
    }

    pub fn buffer(size: u64) -> ResourceCreateInfoBuilder<'a> {
        ResourceCreateInfoBuilder {
            info: Self {
                kind: ResourceKind::Buffer,
                extent: vk::Extent3D {
                    width: 1,
                    height: 1,
                    depth: 1,
                },
                size,
                format: vk::Format::UNDEFINED,
                image_usage: vk::ImageUsageFlags::empty(),
                buffer_usage: vk::BufferUsageFlags::empty(),
                memory_class: MemoryClass::DeviceLocal,
                layer_data: SmallVec::new(),
                generate_mips: false,
                layer_count: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                flags: vk::ImageCreateFlags::empty(),
                image_type: vk::ImageType::TYPE_2D,
                tiling: vk::ImageTiling::OPTIMAL,
                name: "buffer".into(),
            },
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    /// Byte size of a buffer, zero for images
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn image_usage(&self) -> vk::ImageUsageFlags {
        self.image_usage
    }

    pub fn buffer_usage(&self) -> vk::BufferUsageFlags {
        self.buffer_usage
    }

    pub fn memory_class(&self) -> MemoryClass {
        self.memory_class
    }

    /// One payload per array layer, or empty when the resource starts uninitialized
    pub fn layer_data(&self) -> &[&'a [u8]] {
        &self.layer_data
    }

    pub fn generate_mips(&self) -> bool {
        self.generate_mips
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn flags(&self) -> vk::ImageCreateFlags {
        self.flags
    }

    pub fn image_type(&self) -> vk::ImageType {
        self.image_type
    }

    pub fn tiling(&self) -> vk::ImageTiling {
        self.tiling
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct ResourceCreateInfoBuilder<'a> {
    info: ResourceCreateInfo<'a>,
}

impl<'a> ResourceCreateInfoBuilder<'a> {
    pub fn image_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.info.image_usage = usage;
        self
    }

    pub fn buffer_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.info.buffer_usage = usage;
        self
    }

    pub fn memory_class(mut self, memory_class: MemoryClass) -> Self {
        self.info.memory_class = memory_class;
        self
    }

    /// Appends the payload of the next array layer
    pub fn layer_data(mut self, data: &'a [u8]) -> Self {
        self.info.layer_data.push(data);
        self
    }

    pub fn generate_mips(mut self, generate: bool) -> Self {
        self.info.generate_mips = generate;
        self
    }

    pub fn layer_count(mut self, count: u32) -> Self {
        self.info.layer_count = count;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.info.samples = samples;
        self
    }

    pub fn flags(mut self, flags: vk::ImageCreateFlags) -> Self {
        self.info.flags = flags;
        self
    }

    pub fn image_type(mut self, image_type: vk::ImageType) -> Self {
        self.info.image_type = image_type;
        self
    }

    pub fn tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.info.tiling = tiling;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn build(self) -> Result<ResourceCreateInfo<'a>> {
        let info = self.info;
        match info.kind {
            ResourceKind::Buffer => {
                if info.size == 0 {
                    return Err(ResourceError::EmptyBuffer.into());
                }
                if info.buffer_usage.is_empty() {
                    return Err(ResourceError::InvalidUsage("buffer usage must not be empty").into());
                }
                if info.layer_data.len() > 1 {
                    return Err(ResourceError::InvalidUsage("a buffer takes a single payload").into());
                }
                if let Some(data) = info.layer_data.first() {
                    if data.len() as u64 != info.size {
                        return Err(ResourceError::DataSizeMismatch {
                            expected: info.size,
                            got: data.len() as u64,
                        }
                            .into());
                    }
                }
            }
            ResourceKind::Image => {
                let extent = info.extent;
                if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
                    return Err(ResourceError::InvalidExtent {
                        width: extent.width,
                        height: extent.height,
                        depth: extent.depth,
                    }
                        .into());
                }
                if info.format == vk::Format::UNDEFINED {
                    return Err(ResourceError::InvalidUsage("images need a defined format").into());
                }
                if info.image_usage.is_empty() {
                    return Err(ResourceError::InvalidUsage("image usage must not be empty").into());
                }
                if info.layer_count == 0 {
                    return Err(ResourceError::InvalidUsage("images need at least one layer").into());
                }
                if !info.layer_data.is_empty() && info.layer_data.len() as u32 != info.layer_count {
                    return Err(ResourceError::MissingLayerData {
                        expected: info.layer_count,
                        got: info.layer_data.len() as u32,
                    }
                        .into());
                }
                if info.generate_mips && info.samples != vk::SampleCountFlags::TYPE_1 {
                    return Err(ResourceError::InvalidUsage("multisampled images cannot have mips").into());
                }
                if info.memory_class == MemoryClass::HostVisible {
                    return Err(ResourceError::InvalidUsage("images are always device local").into());
                }
            }
        }
        Ok(info)
    }
}
