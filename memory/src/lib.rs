//! Block based GPU memory sub-allocator.
//!
//! `MemoryPool` keeps blocks of device memory for each `Category`
//! and carves `GpuMemory` regions out of them with a best-fit free list.
//! Regions return to their blocks when handles are dropped.

#![deny(unused_must_use)]

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate failure;

mod block;
mod device;
mod error;
mod gpu_memory;
mod memory;
mod pool;
mod suballocator;
mod usage;
mod util;
mod utilization;

#[cfg(feature = "ash")]
mod impls;


pub use crate::{
    device::Device,
    error::{AllocationError, MappingError, MemoryError, OutOfMemoryError},
    gpu_memory::GpuMemory,
    memory::{Memory, Properties},
    pool::{CategoryConfig, FallbackEvent, MemoryPool, MemoryRequirements, PoolConfig},
    usage::{find_memory_type, Category, MemoryTypes, MemoryUsage},
    utilization::{CategoryUtilization, MemoryUtilization, PoolUtilization},
};

#[cfg(feature = "ash")]
pub use crate::impls::{memory_type_properties, non_coherent_atom_size};
