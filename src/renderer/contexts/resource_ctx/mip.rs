use ash::vk;

/// Number of levels in a complete chain down to 1x1x1: `floor(log2(max dimension)) + 1`
pub fn full_chain_levels(extent: vk::Extent3D) -> u32 {
    let largest = extent.width.max(extent.height).max(extent.depth).max(1);
    largest.ilog2() + 1
}

/// Extent of `level`, every axis halved per level and clamped to 1
pub fn level_extent(base: vk::Extent3D, level: u32) -> vk::Extent3D {
    let shrink = |size: u32| size.checked_shr(level).unwrap_or(0).max(1);
    vk::Extent3D {
        width: shrink(base.width),
        height: shrink(base.height),
        depth: shrink(base.depth),
    }
}

/// Far corner of `level` as a blit offset
pub fn level_corner(base: vk::Extent3D, level: u32) -> vk::Offset3D {
    let extent = level_extent(base, level);
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}
