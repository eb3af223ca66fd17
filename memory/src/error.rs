use crate::usage::Category;

/// Typical memory error - out of available memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Fail)]
pub enum OutOfMemoryError {
    /// Host memory exhausted.
    #[fail(display = "Out of host memory")]
    OutOfHostMemory,

    /// Device memory exhausted.
    #[fail(display = "Out of device memory")]
    OutOfDeviceMemory,
}

/// Possible cause of mapping failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Fail)]
pub enum MappingError {
    /// Attempt to map memory without host-visible property.
    #[fail(display = "Memory is not HOST_VISIBLE and can't be mapped")]
    HostInvisible,

    /// Attempt to access memory out of bounds.
    #[fail(display = "Mapping range is out of bound")]
    OutOfBounds,

    /// Unable to allocate an appropriately sized contiguous virtual address range
    #[fail(display = "Virtual memory allocation failed")]
    MappingFailed,

    /// Out of either host or device memory.
    #[fail(display = "{}", _0)]
    OutOfMemoryError(OutOfMemoryError),
}

impl From<OutOfMemoryError> for MappingError {
    fn from(error: OutOfMemoryError) -> Self {
        MappingError::OutOfMemoryError(error)
    }
}

/// Possible cause of raw memory allocation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Fail)]
pub enum AllocationError {
    /// Out of either host or device memory.
    #[fail(display = "{}", _0)]
    OutOfMemoryError(OutOfMemoryError),

    /// Vulkan implementation doesn't allow to create too many objects.
    #[fail(display = "Can't allocate more memory objects")]
    TooManyObjects,
}

impl From<OutOfMemoryError> for AllocationError {
    fn from(error: OutOfMemoryError) -> Self {
        AllocationError::OutOfMemoryError(error)
    }
}

impl AllocationError {
    /// Check if device reported that its memory is exhausted.
    /// Only this kind of failure is retried with smaller blocks.
    pub fn is_out_of_device_memory(&self) -> bool {
        match self {
            AllocationError::OutOfMemoryError(OutOfMemoryError::OutOfDeviceMemory) => true,
            _ => false,
        }
    }
}

/// Errors returned by `MemoryPool`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Fail)]
pub enum MemoryError {
    /// No memory type on the device has properties required by the category.
    #[fail(display = "Memory type for {} not found in device", _0)]
    MemoryTypeNotFound(Category),

    /// Resource can't be placed into memory type the pool resolved for the category.
    #[fail(
        display = "Memory type {} for {} is not among supported types ({:#b})",
        memory_type, category, mask
    )]
    UnsupportedMemoryType {
        /// Category requested.
        category: Category,

        /// Memory type resolved for the category.
        memory_type: u32,

        /// Memory types compatible with the resource.
        mask: u32,
    },

    /// Neither existing nor new blocks can serve the request.
    #[fail(display = "Out of GPU memory for {}", _0)]
    OutOfGpuMemory(Category),

    /// Device failed to allocate memory for reasons other than exhaustion.
    #[fail(display = "{}", _0)]
    AllocationError(AllocationError),

    /// Error occurred during mapping operation.
    #[fail(display = "{}", _0)]
    MappingError(MappingError),
}

impl From<AllocationError> for MemoryError {
    fn from(error: AllocationError) -> Self {
        MemoryError::AllocationError(error)
    }
}

impl From<MappingError> for MemoryError {
    fn from(error: MappingError) -> Self {
        MemoryError::MappingError(error)
    }
}
