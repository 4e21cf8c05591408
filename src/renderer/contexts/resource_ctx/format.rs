use ash::vk;

/// Bytes per texel for uncompressed formats, `None` for block-compressed or unknown ones
pub fn texel_size(format: vk::Format) -> Option<u32> {
    let size = match format {
        vk::Format::R8_UNORM
        | vk::Format::R8_SNORM
        | vk::Format::R8_UINT
        | vk::Format::R8_SINT
        | vk::Format::R8_SRGB
        | vk::Format::S8_UINT => 1,

        vk::Format::R8G8_UNORM
        | vk::Format::R8G8_SNORM
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8_SINT
        | vk::Format::R8G8_SRGB
        | vk::Format::R16_UNORM
        | vk::Format::R16_SNORM
        | vk::Format::R16_UINT
        | vk::Format::R16_SINT
        | vk::Format::R16_SFLOAT
        | vk::Format::R5G6B5_UNORM_PACK16
        | vk::Format::D16_UNORM => 2,

        vk::Format::R8G8B8_UNORM
        | vk::Format::R8G8B8_SRGB
        | vk::Format::B8G8R8_UNORM
        | vk::Format::B8G8R8_SRGB
        | vk::Format::D16_UNORM_S8_UINT => 3,

        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::R16G16_UNORM
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::R32_SFLOAT
        | vk::Format::D32_SFLOAT
        | vk::Format::X8_D24_UNORM_PACK32
        | vk::Format::D24_UNORM_S8_UINT => 4,

        vk::Format::D32_SFLOAT_S8_UINT => 5,

        vk::Format::R16G16B16_SFLOAT => 6,

        vk::Format::R16G16B16A16_UNORM
        | vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R32G32_UINT
        | vk::Format::R32G32_SFLOAT => 8,

        vk::Format::R32G32B32_SFLOAT => 12,

        vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R32G32B32A32_SFLOAT => 16,

        _ => return None,
    };
    Some(size)
}

/// Bytes per texel in buffer memory when copying the [`copy_aspect`] of `format`.
///
/// Depth copies leave the stencil out and pack D24 into 32 bits.
pub fn copy_texel_size(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::D16_UNORM | vk::Format::D16_UNORM_S8_UINT => Some(2),
        vk::Format::X8_D24_UNORM_PACK32
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT
        | vk::Format::D32_SFLOAT_S8_UINT => Some(4),
        _ => texel_size(format),
    }
}

pub fn has_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn is_depth_stencil(format: vk::Format) -> bool {
    has_depth(format) || has_stencil(format)
}

/// Aspects covered by a view or barrier over the whole image
pub fn aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
    let mut aspect = vk::ImageAspectFlags::empty();
    if has_depth(format) {
        aspect |= vk::ImageAspectFlags::DEPTH;
    }
    if has_stencil(format) {
        aspect |= vk::ImageAspectFlags::STENCIL;
    }
    if aspect.is_empty() {
        aspect = vk::ImageAspectFlags::COLOR;
    }
    aspect
}

/// Aspect addressed by copies, which may only name one aspect at a time
pub fn copy_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_depth(format) {
        vk::ImageAspectFlags::DEPTH
    } else if has_stencil(format) {
        vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texel_sizes() {
        assert_eq!(texel_size(vk::Format::R8_UNORM), Some(1));
        assert_eq!(texel_size(vk::Format::R8G8B8A8_SRGB), Some(4));
        assert_eq!(texel_size(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(texel_size(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(texel_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
        assert_eq!(texel_size(vk::Format::UNDEFINED), None);
    }

    #[test]
    fn test_copy_texel_sizes_cover_the_copied_aspect() {
        assert_eq!(texel_size(vk::Format::D32_SFLOAT_S8_UINT), Some(5));
        assert_eq!(copy_texel_size(vk::Format::D32_SFLOAT_S8_UINT), Some(4));
        assert_eq!(copy_texel_size(vk::Format::D16_UNORM_S8_UINT), Some(2));
        assert_eq!(copy_texel_size(vk::Format::D24_UNORM_S8_UINT), Some(4));
        assert_eq!(copy_texel_size(vk::Format::S8_UINT), Some(1));
        assert_eq!(copy_texel_size(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(copy_texel_size(vk::Format::BC7_UNORM_BLOCK), None);
    }

    #[test]
    fn test_depth_and_stencil_aspects() {
        assert_eq!(aspect_flags(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_flags(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_flags(vk::Format::S8_UINT), vk::ImageAspectFlags::STENCIL);
        assert_eq!(aspect_flags(vk::Format::B8G8R8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert_eq!(copy_aspect(vk::Format::D32_SFLOAT_S8_UINT), vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn test_depth_detection() {
        assert!(is_depth_stencil(vk::Format::D16_UNORM));
        assert!(is_depth_stencil(vk::Format::S8_UINT));
        assert!(!has_depth(vk::Format::S8_UINT));
        assert!(!is_depth_stencil(vk::Format::R32_SFLOAT));
    }
}
