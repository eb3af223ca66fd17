//! Memory categories served by the pool and selection of memory types for them.
//! See `Category` and `MemoryTypes` for details.

use crate::{error::MemoryError, memory::Properties};

/// Memory usage trait.
pub trait MemoryUsage {
    /// Comparable fitness value.
    type Fitness: Copy + Ord;

    /// Properties the memory type must have.
    fn properties_required(&self) -> Properties;

    /// Get comparable fitness value for memory properties.
    /// Should return `None` if memory doesn't fit.
    fn memory_fitness(&self, properties: Properties) -> Option<Self::Fitness>;
}

/// Class of memory a block is allocated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Category {
    /// Full speed GPU access.
    /// Optimal for render targets and persistent resources.
    GpuLocal,

    /// GPU memory that host can write to directly.
    /// Used for per-frame uniforms and other small dynamic data.
    GpuLocalMappable,

    /// Host memory visible to the GPU, coherent and preferably uncached.
    /// Used as fallback when `GpuLocal` memory is exhausted.
    HostUncached,
}

impl Category {
    /// All categories in order of their block collections.
    pub const ALL: [Category; 3] = [
        Category::GpuLocal,
        Category::GpuLocalMappable,
        Category::HostUncached,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Category::GpuLocal => 0,
            Category::GpuLocalMappable => 1,
            Category::HostUncached => 2,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.write_str(match self {
            Category::GpuLocal => "device-local memory",
            Category::GpuLocalMappable => "device-local mappable memory",
            Category::HostUncached => "host-visible uncached memory",
        })
    }
}

impl MemoryUsage for Category {
    type Fitness = u8;

    #[inline]
    fn properties_required(&self) -> Properties {
        match self {
            Category::GpuLocal => Properties::DEVICE_LOCAL,
            Category::GpuLocalMappable => Properties::DEVICE_LOCAL | Properties::HOST_VISIBLE,
            Category::HostUncached => Properties::HOST_VISIBLE | Properties::HOST_COHERENT,
        }
    }

    #[inline]
    fn memory_fitness(&self, properties: Properties) -> Option<u8> {
        if !properties.contains(self.properties_required()) {
            return None;
        }

        Some(match self {
            Category::GpuLocal => {
                ((!properties.contains(Properties::HOST_VISIBLE)) as u8) << 3
                    | ((!properties.contains(Properties::LAZILY_ALLOCATED)) as u8) << 2
                    | ((!properties.contains(Properties::HOST_CACHED)) as u8) << 1
                    | ((!properties.contains(Properties::HOST_COHERENT)) as u8)
            }
            Category::GpuLocalMappable => {
                ((!properties.contains(Properties::LAZILY_ALLOCATED)) as u8) << 2
                    | (properties.contains(Properties::HOST_COHERENT) as u8) << 1
                    | ((!properties.contains(Properties::HOST_CACHED)) as u8)
            }
            Category::HostUncached => {
                ((!properties.contains(Properties::HOST_CACHED)) as u8) << 2
                    | ((!properties.contains(Properties::DEVICE_LOCAL)) as u8) << 1
                    | ((!properties.contains(Properties::LAZILY_ALLOCATED)) as u8)
            }
        })
    }
}

/// Find the memory type that suits `usage` best.
/// Ties are resolved in favour of the lowest index.
pub fn find_memory_type(
    types: impl IntoIterator<Item = Properties>,
    usage: &impl MemoryUsage,
) -> Option<u32> {
    types
        .into_iter()
        .enumerate()
        .filter_map(|(index, properties)| {
            usage
                .memory_fitness(properties)
                .map(|fitness| (index as u32, fitness))
        })
        .max_by(|(li, lf), (ri, rf)| lf.cmp(rf).then(ri.cmp(li)))
        .map(|(index, _)| index)
}

/// Memory type indices resolved for every category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryTypes {
    types: [u32; 3],
    properties: [Properties; 3],
}

impl MemoryTypes {
    /// Resolve memory types from properties of every memory type exposed by the physical device,
    /// in memory type index order.
    pub fn resolve(types: impl IntoIterator<Item = Properties>) -> Result<Self, MemoryError> {
        let types = types.into_iter().collect::<smallvec::SmallVec<[_; 32]>>();
        assert!(
            types.len() <= 32,
            "Vulkan exposes at most 32 memory types, got {}",
            types.len()
        );

        let mut resolved = MemoryTypes {
            types: [0; 3],
            properties: [Properties::empty(); 3],
        };

        for &category in &Category::ALL {
            let index = find_memory_type(types.iter().cloned(), &category)
                .ok_or(MemoryError::MemoryTypeNotFound(category))?;
            resolved.types[category.index()] = index;
            resolved.properties[category.index()] = types[index as usize];
        }

        Ok(resolved)
    }

    /// Memory type index for the category.
    pub fn memory_type(&self, category: Category) -> u32 {
        self.types[category.index()]
    }

    /// Properties of the memory type resolved for the category.
    pub fn properties(&self, category: Category) -> Properties {
        self.properties[category.index()]
    }

    /// Check if any memory type in the `mask` is the one resolved for the category.
    pub fn supports(&self, category: Category, mask: u32) -> bool {
        mask & (1u32 << self.memory_type(category)) != 0
    }
}
