use std::{ops::Range, ptr::NonNull};

use ::ash::{vk, Device as AshDevice, Instance};
use smallvec::SmallVec;

use crate::{
    device::Device,
    error::*,
    memory::Properties,
    pool::MemoryRequirements,
};

impl From<vk::Result> for OutOfMemoryError {
    fn from(result: vk::Result) -> OutOfMemoryError {
        match result {
            vk::Result::SUCCESS => panic!("Unexpected success"),
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => OutOfMemoryError::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => OutOfMemoryError::OutOfDeviceMemory,
            _ => panic!("Unexpected error: {:?}", result),
        }
    }
}

impl From<vk::Result> for MappingError {
    fn from(result: vk::Result) -> MappingError {
        match result {
            vk::Result::SUCCESS => panic!("Unexpected success"),
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => OutOfMemoryError::OutOfHostMemory.into(),
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => OutOfMemoryError::OutOfDeviceMemory.into(),
            vk::Result::ERROR_MEMORY_MAP_FAILED => MappingError::MappingFailed,
            _ => panic!("Unexpected error: {:?}", result),
        }
    }
}

impl From<vk::Result> for AllocationError {
    fn from(result: vk::Result) -> AllocationError {
        match result {
            vk::Result::SUCCESS => panic!("Unexpected success"),
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => OutOfMemoryError::OutOfHostMemory.into(),
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => OutOfMemoryError::OutOfDeviceMemory.into(),
            vk::Result::ERROR_TOO_MANY_OBJECTS => AllocationError::TooManyObjects,
            _ => panic!("Unexpected error: {:?}", result),
        }
    }
}

impl From<vk::MemoryPropertyFlags> for Properties {
    fn from(flags: vk::MemoryPropertyFlags) -> Properties {
        Properties::from_bits_truncate(flags.as_raw())
    }
}

impl From<vk::MemoryRequirements> for MemoryRequirements {
    fn from(requirements: vk::MemoryRequirements) -> MemoryRequirements {
        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            type_mask: requirements.memory_type_bits,
        }
    }
}

/// Query properties of every memory type of the physical device.
/// Result can be passed to `MemoryPool::new`.
///
/// # Safety
///
/// `physical_device` must be enumerated from the `instance`.
pub unsafe fn memory_type_properties(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Vec<Properties> {
    let properties = instance.get_physical_device_memory_properties(physical_device);
    properties.memory_types[..properties.memory_type_count as usize]
        .iter()
        .map(|memory_type| memory_type.property_flags.into())
        .collect()
}

/// Query `nonCoherentAtomSize` limit of the physical device.
///
/// # Safety
///
/// `physical_device` must be enumerated from the `instance`.
pub unsafe fn non_coherent_atom_size(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> u64 {
    instance
        .get_physical_device_properties(physical_device)
        .limits
        .non_coherent_atom_size
}

fn mapped_ranges<'a>(
    regions: impl IntoIterator<Item = (&'a vk::DeviceMemory, Range<u64>)>,
) -> SmallVec<[vk::MappedMemoryRange; 4]> {
    regions
        .into_iter()
        .map(|(memory, range)| {
            vk::MappedMemoryRange::builder()
                .memory(*memory)
                .offset(range.start)
                .size(range.end - range.start)
                .build()
        })
        .collect()
}

impl Device for AshDevice {
    type Memory = vk::DeviceMemory;

    unsafe fn allocate(&self, index: u32, size: u64) -> Result<vk::DeviceMemory, AllocationError> {
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(index);
        Ok(self.allocate_memory(&info, None)?)
    }

    unsafe fn free(&self, memory: vk::DeviceMemory) {
        self.free_memory(memory, None);
    }

    unsafe fn map(
        &self,
        memory: &vk::DeviceMemory,
        range: Range<u64>,
    ) -> Result<NonNull<u8>, MappingError> {
        let ptr = self.map_memory(
            *memory,
            range.start,
            range.end - range.start,
            vk::MemoryMapFlags::empty(),
        )?;
        NonNull::new(ptr as *mut u8).ok_or(MappingError::MappingFailed)
    }

    unsafe fn unmap(&self, memory: &vk::DeviceMemory) {
        self.unmap_memory(*memory)
    }

    unsafe fn invalidate<'a>(
        &self,
        regions: impl IntoIterator<Item = (&'a vk::DeviceMemory, Range<u64>)>,
    ) -> Result<(), OutOfMemoryError> {
        self.invalidate_mapped_memory_ranges(&mapped_ranges(regions))?;
        Ok(())
    }

    unsafe fn flush<'a>(
        &self,
        regions: impl IntoIterator<Item = (&'a vk::DeviceMemory, Range<u64>)>,
    ) -> Result<(), OutOfMemoryError> {
        self.flush_mapped_memory_ranges(&mapped_ranges(regions))?;
        Ok(())
    }
}
