bitflags! {
    /// Memory property flags.
    /// Mirrors `VkMemoryPropertyFlags`.
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Properties: u32 {
        /// Device local memory.
        /// Fastest to access from the device.
        const DEVICE_LOCAL = 0x1;

        /// Memory can be mapped to the host.
        const HOST_VISIBLE = 0x2;

        /// Host writes and device writes are visible without explicit flush and invalidate.
        const HOST_COHERENT = 0x4;

        /// Memory is cached on the host.
        /// Host reads are faster, host writes may be slower.
        const HOST_CACHED = 0x8;

        /// Memory is allocated by the implementation only when needed.
        const LAZILY_ALLOCATED = 0x10;
    }
}

/// Memory object wrapper.
/// Contains size and properties of the memory.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct Memory<T> {
    raw: T,
    size: u64,
    properties: Properties,
    #[derivative(Debug = "ignore")]
    relevant: relevant::Relevant,
}

impl<T> Memory<T> {
    /// Get memory properties.
    pub fn properties(&self) -> Properties {
        self.properties
    }

    /// Get memory size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get raw memory.
    pub fn raw(&self) -> &T {
        &self.raw
    }

    /// Create memory from raw object.
    ///
    /// # Safety
    ///
    /// `raw` must be a memory object of `size` bytes with `properties`,
    /// and must not be freed by anyone but the owner of this wrapper.
    pub unsafe fn from_raw(raw: T, size: u64, properties: Properties) -> Self {
        Memory {
            properties,
            raw,
            size,
            relevant: relevant::Relevant,
        }
    }

    /// Check if this memory is host-visible and can be mapped.
    /// `memory.host_visible()` is equivalent to `memory.properties().contains(Properties::HOST_VISIBLE)`
    pub fn host_visible(&self) -> bool {
        self.properties.contains(Properties::HOST_VISIBLE)
    }

    /// Check if this memory is host-coherent and doesn't require invalidating or flushing.
    /// `memory.host_coherent()` is equivalent to `memory.properties().contains(Properties::HOST_COHERENT)`
    pub fn host_coherent(&self) -> bool {
        self.properties.contains(Properties::HOST_COHERENT)
    }

    /// Take raw memory object out, disarming the drop guard.
    /// Caller is responsible for freeing it.
    pub(crate) fn into_raw(self) -> T {
        self.relevant.dispose();
        self.raw
    }
}
