use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::{
    block::MemoryBlock,
    device::Device,
    error::MemoryError,
    gpu_memory::GpuMemory,
    memory::Properties,
    usage::{Category, MemoryTypes},
    utilization::{CategoryUtilization, MemoryUtilization, PoolUtilization},
};

/// Config for one category of blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CategoryConfig {
    /// Size of blocks allocated from the device.
    /// Requests larger than this get a block of their own size.
    pub max_block_size: u64,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        CategoryConfig {
            max_block_size: 32 * 1024 * 1024,
        }
    }
}

/// Config for `MemoryPool`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Config for device-local blocks.
    pub gpu_local: CategoryConfig,

    /// Config for device-local mappable blocks.
    pub gpu_local_mappable: CategoryConfig,

    /// Config for host-visible uncached blocks.
    pub host_uncached: CategoryConfig,

    /// `nonCoherentAtomSize` limit of the physical device.
    /// Flushed and invalidated ranges are aligned to it.
    #[cfg_attr(feature = "serde", serde(default = "default_atom_size"))]
    pub non_coherent_atom_size: u64,
}

fn default_atom_size() -> u64 {
    256
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            gpu_local: CategoryConfig::default(),
            gpu_local_mappable: CategoryConfig::default(),
            host_uncached: CategoryConfig::default(),
            non_coherent_atom_size: default_atom_size(),
        }
    }
}

impl PoolConfig {
    /// Get config of the category.
    pub fn category(&self, category: Category) -> &CategoryConfig {
        match category {
            Category::GpuLocal => &self.gpu_local,
            Category::GpuLocalMappable => &self.gpu_local_mappable,
            Category::HostUncached => &self.host_uncached,
        }
    }

    fn check(&self) {
        for &category in &Category::ALL {
            assert_ne!(
                self.category(category).max_block_size,
                0,
                "Max block size for {} must be non-zero",
                category
            );
        }
        assert!(
            self.non_coherent_atom_size.is_power_of_two(),
            "Non-coherent atom size must be power of two, got {}",
            self.non_coherent_atom_size
        );
    }
}

/// Memory requirements of a buffer or image.
/// Mirrors `VkMemoryRequirements`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// Size in bytes.
    pub size: u64,

    /// Required alignment of the offset.
    pub alignment: u64,

    /// Bit `i` is set if memory type `i` can hold the resource.
    pub type_mask: u32,
}

impl MemoryRequirements {
    // Zero sized or zero aligned requests are served as one byte aligned to one.
    fn normalized(self) -> Self {
        MemoryRequirements {
            size: self.size.max(1),
            alignment: self.alignment.max(1),
            type_mask: self.type_mask,
        }
    }
}

/// Emitted when request for one category is served from another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FallbackEvent {
    /// Requirements of the request.
    pub requirements: MemoryRequirements,

    /// Category requested.
    pub from: Category,

    /// Category the memory was allocated from.
    pub to: Category,
}

type FallbackListener = Box<dyn Fn(&FallbackEvent) + Send + Sync>;

#[derive(derivative::Derivative)]
#[derivative(Debug)]
struct Blocks<M> {
    category: Category,
    memory_type: u32,
    properties: Properties,
    max_block_size: u64,
    #[derivative(Debug = "ignore")]
    blocks: RwLock<Vec<Arc<MemoryBlock<M>>>>,

    /// Held from the re-scan until the new block is published.
    /// Only one thread grows the category at a time.
    #[derivative(Debug = "ignore")]
    grow: Mutex<()>,
}

impl<M> Blocks<M> {
    /// Carve region from the first block that can hold it.
    fn try_allocate(&self, size: u64, alignment: u64) -> Option<GpuMemory<M>> {
        self.blocks
            .read()
            .iter()
            .find_map(|block| block.try_allocate(size, alignment))
    }
}

/// Pool of device memory blocks, one collection per `Category`.
///
/// Requests are served from existing blocks in creation order,
/// new blocks are allocated from the device when all of them are full.
/// All methods take `&self`, so one pool can be shared between threads.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct MemoryPool<M> {
    types: MemoryTypes,
    config: PoolConfig,
    categories: Vec<Blocks<M>>,
    #[derivative(Debug = "ignore")]
    fallback_listener: Option<FallbackListener>,
}

impl<M> MemoryPool<M> {
    /// Create new pool.
    ///
    /// `memory_types` are properties of every memory type of the physical device,
    /// in memory type index order.
    /// Fails if any category has no suitable memory type.
    pub fn new(
        memory_types: impl IntoIterator<Item = Properties>,
        config: PoolConfig,
    ) -> Result<Self, MemoryError> {
        config.check();
        let types = MemoryTypes::resolve(memory_types)?;

        let categories = Category::ALL
            .iter()
            .map(|&category| {
                log::info!(
                    "Use memory type {} ({:?}) for {}. Blocks of {} bytes",
                    types.memory_type(category),
                    types.properties(category),
                    category,
                    config.category(category).max_block_size,
                );
                Blocks {
                    category,
                    memory_type: types.memory_type(category),
                    properties: types.properties(category),
                    max_block_size: config.category(category).max_block_size,
                    blocks: RwLock::new(Vec::new()),
                    grow: Mutex::new(()),
                }
            })
            .collect();

        Ok(MemoryPool {
            types,
            config,
            categories,
            fallback_listener: None,
        })
    }

    /// Set function to be called every time device-local request is served from host memory.
    pub fn with_fallback_listener(
        mut self,
        listener: impl Fn(&FallbackEvent) + Send + Sync + 'static,
    ) -> Self {
        self.fallback_listener = Some(Box::new(listener));
        self
    }

    /// Memory types resolved for categories.
    pub fn memory_types(&self) -> &MemoryTypes {
        &self.types
    }

    /// Config the pool was created with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Allocate device-local memory.
    ///
    /// When device-local memory is exhausted and the resource can live in host-visible uncached memory,
    /// memory is allocated from there instead.
    /// `GpuMemory::category` tells which one was used.
    ///
    /// # Safety
    ///
    /// `device` must be the one the memory types were queried for,
    /// and the same device must be used for all calls on this pool.
    pub unsafe fn allocate_gpu_local<D>(
        &self,
        device: &D,
        requirements: MemoryRequirements,
    ) -> Result<GpuMemory<M>, MemoryError>
    where
        D: Device<Memory = M>,
    {
        let requirements = requirements.normalized();
        self.check_supported(Category::GpuLocal, requirements.type_mask)?;

        match self.allocate_from(device, Category::GpuLocal, &requirements) {
            Err(MemoryError::OutOfGpuMemory(_))
                if self
                    .types
                    .supports(Category::HostUncached, requirements.type_mask) =>
            {
                log::warn!(
                    "Out of {}. {} bytes are allocated from {} instead",
                    Category::GpuLocal,
                    requirements.size,
                    Category::HostUncached,
                );

                let memory = self
                    .allocate_from(device, Category::HostUncached, &requirements)
                    .map_err(|error| match error {
                        MemoryError::OutOfGpuMemory(_) => {
                            MemoryError::OutOfGpuMemory(Category::GpuLocal)
                        }
                        error => error,
                    })?;

                if let Some(listener) = &self.fallback_listener {
                    listener(&FallbackEvent {
                        requirements,
                        from: Category::GpuLocal,
                        to: Category::HostUncached,
                    });
                }
                Ok(memory)
            }
            result => result,
        }
    }

    /// Allocate device-local memory that host can write to.
    /// There is no fallback for this category.
    ///
    /// # Safety
    ///
    /// See `allocate_gpu_local`.
    pub unsafe fn allocate_gpu_local_mappable<D>(
        &self,
        device: &D,
        requirements: MemoryRequirements,
    ) -> Result<GpuMemory<M>, MemoryError>
    where
        D: Device<Memory = M>,
    {
        let requirements = requirements.normalized();
        self.check_supported(Category::GpuLocalMappable, requirements.type_mask)?;
        self.allocate_from(device, Category::GpuLocalMappable, &requirements)
    }

    fn check_supported(&self, category: Category, mask: u32) -> Result<(), MemoryError> {
        if self.types.supports(category, mask) {
            Ok(())
        } else {
            Err(MemoryError::UnsupportedMemoryType {
                category,
                memory_type: self.types.memory_type(category),
                mask,
            })
        }
    }

    unsafe fn allocate_from<D>(
        &self,
        device: &D,
        category: Category,
        requirements: &MemoryRequirements,
    ) -> Result<GpuMemory<M>, MemoryError>
    where
        D: Device<Memory = M>,
    {
        let blocks = &self.categories[category.index()];
        let MemoryRequirements {
            size, alignment, ..
        } = *requirements;

        if let Some(memory) = blocks.try_allocate(size, alignment) {
            return Ok(memory);
        }

        let _grow = blocks.grow.lock();

        // Another thread may have published a block while this one was waiting.
        if let Some(memory) = blocks.try_allocate(size, alignment) {
            return Ok(memory);
        }

        let block = self.create_block(device, blocks, size)?;

        // New block is carved before other threads can see it.
        let memory = block.try_allocate(size, alignment);
        blocks.blocks.write().push(block);
        memory.ok_or(MemoryError::OutOfGpuMemory(category))
    }

    /// Allocate new block for the category, halving its size each time device runs out of memory.
    /// Block is never smaller than `floor`.
    unsafe fn create_block<D>(
        &self,
        device: &D,
        blocks: &Blocks<M>,
        floor: u64,
    ) -> Result<Arc<MemoryBlock<M>>, MemoryError>
    where
        D: Device<Memory = M>,
    {
        let mut size = blocks.max_block_size.max(floor);

        loop {
            match MemoryBlock::create(
                device,
                blocks.category,
                blocks.memory_type,
                blocks.properties,
                size,
                self.config.non_coherent_atom_size,
            ) {
                Ok(block) => {
                    log::debug!(
                        "New {} block of {} bytes from memory type {}",
                        blocks.category,
                        size,
                        blocks.memory_type,
                    );
                    return Ok(Arc::new(block));
                }
                Err(MemoryError::AllocationError(error)) if error.is_out_of_device_memory() => {
                    if size <= floor {
                        log::warn!(
                            "Failed to allocate {} block of {} bytes: {}",
                            blocks.category,
                            size,
                            error,
                        );
                        return Err(MemoryError::OutOfGpuMemory(blocks.category));
                    }
                    let next = (size / 2).max(floor);
                    log::warn!(
                        "Failed to allocate {} block of {} bytes. Retry with {} bytes",
                        blocks.category,
                        size,
                        next,
                    );
                    size = next;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Get utilization of every category.
    pub fn utilization(&self) -> PoolUtilization {
        PoolUtilization {
            categories: self
                .categories
                .iter()
                .map(|blocks| {
                    let list = blocks.blocks.read();
                    let mut utilization = CategoryUtilization {
                        category: blocks.category,
                        memory_type: blocks.memory_type,
                        properties: blocks.properties,
                        blocks: list.len(),
                        allocations: 0,
                        free_regions: 0,
                        utilization: MemoryUtilization {
                            used: 0,
                            effective: 0,
                        },
                    };
                    for block in list.iter() {
                        let occupancy = block.occupancy();
                        utilization.allocations += occupancy.allocations;
                        utilization.free_regions += occupancy.free_regions;
                        utilization.utilization.used += block.size();
                        utilization.utilization.effective += occupancy.allocated;
                    }
                    utilization
                })
                .collect(),
        }
    }

    /// Number of `GpuMemory` handles alive.
    pub fn live_allocations(&self) -> usize {
        self.categories
            .iter()
            .map(|blocks| {
                blocks
                    .blocks
                    .read()
                    .iter()
                    .map(|block| block.occupancy().allocations)
                    .sum::<usize>()
            })
            .sum()
    }

    /// Check bookkeeping of every block.
    #[cfg(test)]
    pub(crate) fn validate(&self) -> Result<(), failure::Error> {
        for blocks in &self.categories {
            for block in blocks.blocks.read().iter() {
                block.validate()?;
            }
        }
        Ok(())
    }

    /// Free all blocks.
    ///
    /// All `GpuMemory` handles should be dropped before this call.
    /// Blocks still used by live handles are reported and left to them,
    /// their memory objects are never freed.
    ///
    /// # Safety
    ///
    /// `device` must be the one all blocks were allocated from.
    /// Device must not use the memory anymore.
    pub unsafe fn dispose<D>(self, device: &D)
    where
        D: Device<Memory = M>,
    {
        let leaked = self.free_blocks(device);
        debug_assert_eq!(leaked, 0, "All allocations must be freed before pool disposal");
    }

    /// Free every block no handle refers to.
    /// Returns number of allocations still alive in the rest.
    pub(crate) unsafe fn free_blocks<D>(self, device: &D) -> usize
    where
        D: Device<Memory = M>,
    {
        let mut leaked = 0;

        for blocks in self.categories {
            for block in blocks.blocks.into_inner() {
                if let Err(error) = block.validate() {
                    log::error!("Corrupted {} block: {}", blocks.category, error);
                }

                match Arc::try_unwrap(block) {
                    Ok(block) => block.dispose(device),
                    Err(block) => {
                        let occupancy = block.occupancy();
                        log::error!(
                            "{} allocations of {} bytes leaked in {} block of type {}",
                            occupancy.allocations,
                            occupancy.allocated,
                            blocks.category,
                            blocks.memory_type,
                        );
                        leaked += occupancy.allocations;
                    }
                }
            }
        }

        leaked
    }
}
