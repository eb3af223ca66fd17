use std::{ptr::NonNull, sync::Arc};

use parking_lot::Mutex;

use crate::{
    device::Device,
    error::MemoryError,
    gpu_memory::GpuMemory,
    memory::{Memory, Properties},
    suballocator::{Occupancy, Suballocations},
    usage::Category,
};

/// One memory object allocated from the device and shared by suballocations carved from it.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub(crate) struct MemoryBlock<M> {
    memory: Memory<M>,
    memory_type: u32,
    category: Category,
    non_coherent_atom_size: u64,
    #[derivative(Debug = "ignore")]
    mapping: Option<NonNull<u8>>,
    suballocations: Mutex<Suballocations>,
}

// Mapping pointer is only dereferenced through `GpuMemory` which owns its region exclusively.
unsafe impl<M> Send for MemoryBlock<M> where M: Send {}
unsafe impl<M> Sync for MemoryBlock<M> where M: Sync {}

impl<M> MemoryBlock<M> {
    /// Allocate new block from the device.
    /// Host-visible memory is mapped for the whole lifetime of the block.
    ///
    /// # Safety
    ///
    /// `memory_type` must be valid memory type index of the `device` with `properties`.
    pub unsafe fn create<D>(
        device: &D,
        category: Category,
        memory_type: u32,
        properties: Properties,
        size: u64,
        non_coherent_atom_size: u64,
    ) -> Result<Self, MemoryError>
    where
        D: Device<Memory = M>,
    {
        let raw = device.allocate(memory_type, size)?;

        let mapping = if properties.contains(Properties::HOST_VISIBLE) {
            log::trace!("Map new memory object");
            match device.map(&raw, 0..size) {
                Ok(ptr) => Some(ptr),
                Err(error) => {
                    device.free(raw);
                    return Err(error.into());
                }
            }
        } else {
            None
        };

        Ok(MemoryBlock {
            memory: Memory::from_raw(raw, size, properties),
            memory_type,
            category,
            non_coherent_atom_size,
            mapping,
            suballocations: Mutex::new(Suballocations::new(size)),
        })
    }

    pub fn memory(&self) -> &Memory<M> {
        &self.memory
    }

    pub fn memory_type(&self) -> u32 {
        self.memory_type
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn size(&self) -> u64 {
        self.memory.size()
    }

    pub fn non_coherent_atom_size(&self) -> u64 {
        self.non_coherent_atom_size
    }

    pub fn mapping(&self) -> Option<NonNull<u8>> {
        self.mapping
    }

    /// Carve region out of this block.
    pub fn try_allocate(self: &Arc<Self>, size: u64, align: u64) -> Option<GpuMemory<M>> {
        let carved = self.suballocations.lock().allocate(size, align)?;
        log::trace!(
            "Suballocate {} bytes at {} from {:?} block of type {}",
            carved.size,
            carved.offset,
            self.category,
            self.memory_type,
        );
        Some(GpuMemory::new(Arc::clone(self), carved))
    }

    /// Return region to the block.
    pub fn release(&self, key: usize) {
        let mut suballocations = self.suballocations.lock();
        suballocations.release(key);
        log::trace!(
            "Release suballocation of {:?} block of type {}. Largest free region: {}",
            self.category,
            self.memory_type,
            suballocations.max_free_size(),
        );
    }

    pub fn occupancy(&self) -> Occupancy {
        self.suballocations.lock().occupancy()
    }

    pub fn validate(&self) -> Result<(), failure::Error> {
        self.suballocations.lock().validate()
    }

    /// Unmap and free memory object.
    ///
    /// # Safety
    ///
    /// Block must be created from the `device`.
    pub unsafe fn dispose<D>(mut self, device: &D)
    where
        D: Device<Memory = M>,
    {
        debug_assert!(
            self.suballocations.get_mut().is_unused(),
            "Block must be unused when disposed"
        );
        if self.mapping.is_some() {
            log::trace!(
                "Unmap {} bytes of memory type {}",
                self.size(),
                self.memory_type
            );
            device.unmap(self.memory.raw());
        }
        device.free(self.memory.into_raw());
    }
}
