use std::{iter::once, ops::Range, ptr::NonNull, sync::Arc};

use crate::{
    block::MemoryBlock,
    device::Device,
    error::MappingError,
    memory::Properties,
    suballocator::Carved,
    usage::Category,
    util::*,
};

/// Region of device memory allocated from `MemoryPool`.
///
/// Bind buffers and images with `memory()` and `offset()`.
/// The region goes back to its block when the handle is dropped,
/// which makes the handle the only owner of the region.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct GpuMemory<M> {
    #[derivative(Debug = "ignore")]
    block: Arc<MemoryBlock<M>>,
    key: usize,
    offset: u64,
    size: u64,
}

impl<M> GpuMemory<M> {
    pub(crate) fn new(block: Arc<MemoryBlock<M>>, carved: Carved) -> Self {
        GpuMemory {
            block,
            key: carved.key,
            offset: carved.offset,
            size: carved.size,
        }
    }

    /// Get raw memory object the region belongs to.
    pub fn memory(&self) -> &M {
        self.block.memory().raw()
    }

    /// Offset of the region within the memory object.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the region.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Range of the memory object owned by this handle.
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.size
    }

    /// Category of the block the region was carved from.
    /// `HostUncached` for device-local requests served by the fallback.
    pub fn category(&self) -> Category {
        self.block.category()
    }

    /// Memory type index of the memory object.
    pub fn memory_type(&self) -> u32 {
        self.block.memory_type()
    }

    /// Properties of the memory object.
    pub fn properties(&self) -> Properties {
        self.block.memory().properties()
    }

    /// Check if host can access this region.
    pub fn is_mappable(&self) -> bool {
        self.block.mapping().is_some()
    }

    /// Copy `data` into the region at `offset` relative to the region start.
    /// Non-coherent memory is flushed.
    ///
    /// # Safety
    ///
    /// Device must not access the written range until this call returns.
    /// `device` must be the one the memory was allocated from.
    pub unsafe fn write<D>(&mut self, device: &D, offset: u64, data: &[u8]) -> Result<(), MappingError>
    where
        D: Device<Memory = M>,
    {
        let (ptr, range) = self.mapped_range(offset, data.len() as u64)?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());

        if !self.block.memory().host_coherent() && !data.is_empty() {
            device.flush(once((self.memory(), self.atom_range(range))))?;
        }
        Ok(())
    }

    /// Copy bytes from the region at `offset` relative to the region start into `data`.
    /// Non-coherent memory is invalidated first.
    ///
    /// # Safety
    ///
    /// Device writes to the range must be finished and made available to the host.
    /// `device` must be the one the memory was allocated from.
    pub unsafe fn read<D>(&self, device: &D, offset: u64, data: &mut [u8]) -> Result<(), MappingError>
    where
        D: Device<Memory = M>,
    {
        let (ptr, range) = self.mapped_range(offset, data.len() as u64)?;

        if !self.block.memory().host_coherent() && !data.is_empty() {
            device.invalidate(once((self.memory(), self.atom_range(range))))?;
        }

        std::ptr::copy_nonoverlapping(ptr.as_ptr(), data.as_mut_ptr(), data.len());
        Ok(())
    }

    /// Pointer and memory object range for `len` bytes at `offset` of the region.
    fn mapped_range(&self, offset: u64, len: u64) -> Result<(NonNull<u8>, Range<u64>), MappingError> {
        let mapping = self.block.mapping().ok_or(MappingError::HostInvisible)?;

        let end = offset.checked_add(len).ok_or(MappingError::OutOfBounds)?;
        if end > self.size {
            return Err(MappingError::OutOfBounds);
        }

        let range = self.offset + offset..self.offset + end;
        debug_assert!(is_sub_range(self.range(), range.clone()));
        if !fits_usize(range.end) {
            return Err(MappingError::MappingFailed);
        }

        // Mapping covers whole block, and `range` lies within it.
        let ptr = unsafe { NonNull::new_unchecked(mapping.as_ptr().add(range.start as usize)) };
        Ok((ptr, range))
    }

    /// Widen range to non-coherent atom boundaries, without leaving the memory object.
    fn atom_range(&self, range: Range<u64>) -> Range<u64> {
        clamp_range(
            align_range(range, self.block.non_coherent_atom_size()),
            0..self.block.size(),
        )
    }
}

impl<M> Drop for GpuMemory<M> {
    fn drop(&mut self) {
        self.block.release(self.key);
    }
}
