use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::AllocationError;
use thiserror::Error;

/// Failures raised while creating or moving data into GPU resources.
///
/// These travel inside `color_eyre::Report`; match on them with
/// `report.downcast_ref::<ResourceError>()`.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to allocate device memory for `{name}`")]
    Allocation {
        name: String,
        #[source]
        source: AllocationError,
    },
    #[error("{what} failed: {result}")]
    Driver {
        what: &'static str,
        result: vk::Result,
    },
    #[error("buffer size must be greater than zero")]
    EmptyBuffer,
    #[error("payload holds {got} bytes but the buffer is {expected} bytes")]
    DataSizeMismatch { expected: u64, got: u64 },
    #[error("extent {width}x{height}x{depth} has a zero dimension")]
    InvalidExtent { width: u32, height: u32, depth: u32 },
    #[error("extent {width}x{height} exceeds the device limit of {max}")]
    ExtentTooLarge { width: u32, height: u32, max: u32 },
    #[error("invalid usage: {0}")]
    InvalidUsage(&'static str),
    #[error("expected {expected} layer payloads, got {got}")]
    MissingLayerData { expected: u32, got: u32 },
    #[error("layer {layer} holds {got} bytes, {expected} are required")]
    LayerDataTooSmall { layer: u32, expected: u64, got: u64 },
    #[error("texel size of {0:?} is unknown")]
    UnknownTexelSize(vk::Format),
    #[error("buffer memory is not host visible")]
    NotHostVisible,
    #[error("{len} bytes at offset {offset} do not fit the {size} byte buffer")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
}

pub(crate) trait DriverResultExt<T> {
    /// Tags a raw driver failure with the entry point that produced it
    fn driver(self, what: &'static str) -> Result<T, ResourceError>;
}

impl<T> DriverResultExt<T> for VkResult<T> {
    fn driver(self, what: &'static str) -> Result<T, ResourceError> {
        self.map_err(|result| ResourceError::Driver { what, result })
    }
}
