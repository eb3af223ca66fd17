use colorful::{core::color_string::CString, Color, Colorful as _};

use crate::{memory::Properties, usage::Category};

/// Memory utilization stats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryUtilization {
    /// Total number of bytes allocated from the device.
    pub used: u64,
    /// Number of bytes handed out to `GpuMemory` handles.
    pub effective: u64,
}

/// Memory utilization of one category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CategoryUtilization {
    /// Category.
    pub category: Category,

    /// Memory type blocks are allocated from.
    pub memory_type: u32,

    /// Properties of the memory type.
    pub properties: Properties,

    /// Number of blocks.
    pub blocks: usize,

    /// Number of live suballocations.
    pub allocations: usize,

    /// Number of free regions across all blocks.
    pub free_regions: usize,

    /// Utilization.
    pub utilization: MemoryUtilization,
}

/// Memory utilization of the whole pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolUtilization {
    /// Utilization by categories.
    pub categories: Vec<CategoryUtilization>,
}

impl PoolUtilization {
    /// Sum over all categories.
    pub fn total(&self) -> MemoryUtilization {
        self.categories.iter().fold(
            MemoryUtilization {
                used: 0,
                effective: 0,
            },
            |acc, category| MemoryUtilization {
                used: acc.used + category.utilization.used,
                effective: acc.effective + category.utilization.effective,
            },
        )
    }
}

impl std::fmt::Display for PoolUtilization {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const MB: u64 = 1024 * 1024;

        writeln!(fmt, "!!! Memory utilization !!!")?;
        for category in &self.categories {
            let MemoryUtilization { used, effective } = category.utilization;
            let permyriad = if used > 0 {
                effective * 10000 / used
            } else {
                0
            };
            let fill = (permyriad / 200) as usize;

            let line = ("|".repeat(fill) + &(" ".repeat(50 - fill)))
                .gradient_with_color(Color::Green, Color::Red);
            writeln!(
                fmt,
                "{} (type {}, {:?}):\n{:>6} / {:<6} or{} in {} blocks [{}]",
                format!("{}", category.category).magenta(),
                category.memory_type,
                category.properties,
                format!("{}MB", effective / MB),
                format!("{}MB", used / MB),
                format_permyriad(permyriad),
                category.blocks,
                line
            )?;
            writeln!(
                fmt,
                "         {} allocations, {} free regions",
                category.allocations, category.free_regions,
            )?;
        }

        Ok(())
    }
}

fn format_permyriad(permyriad: u64) -> CString {
    debug_assert!(permyriad <= 10000);
    let s = format!("{:>3}.{:02}%", permyriad / 100, permyriad % 100);
    if permyriad > 7500 {
        s.red()
    } else if permyriad > 5000 {
        s.yellow()
    } else if permyriad > 2500 {
        s.green()
    } else if permyriad > 100 {
        s.blue()
    } else {
        s.white()
    }
}
