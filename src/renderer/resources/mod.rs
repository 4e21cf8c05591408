//! RAII handles consumers hold on to. Each one keeps the allocator that created it alive
//! and hands its memory back to it on drop.

pub mod buffer;
pub mod buffer_pool;
pub mod create_info;
pub mod image;
