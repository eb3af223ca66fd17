//! Best-fit free-list allocator over the address range of a single block.
//!
//! Regions are kept in a slab and linked in offset order, so the sequence always tiles
//! `0..size`. Free regions are additionally listed in `free`, and the largest one is
//! remembered to reject requests that can't fit without scanning.

use {crate::util::padding, slab::Slab, smallvec::SmallVec};

#[derive(Clone, Copy, Debug)]
struct Suballocation {
    offset: u64,
    size: u64,
    free: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Suballocation {
    fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Region carved out by `Suballocations::allocate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Carved {
    /// Key that must be passed to `Suballocations::release`.
    pub key: usize,
    pub offset: u64,
    pub size: u64,
}

/// Occupancy summary of one block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Occupancy {
    pub allocated: u64,
    pub allocations: usize,
    pub free_regions: usize,
}

#[derive(Debug)]
pub(crate) struct Suballocations {
    size: u64,
    records: Slab<Suballocation>,
    head: usize,
    free: Vec<usize>,
    max_free: Option<usize>,
}

impl Suballocations {
    /// Create allocator with single free region spanning `0..size`.
    pub fn new(size: u64) -> Self {
        assert_ne!(size, 0, "Block can't be empty");
        let mut records = Slab::with_capacity(16);
        let head = records.insert(Suballocation {
            offset: 0,
            size,
            free: true,
            prev: None,
            next: None,
        });

        Suballocations {
            size,
            records,
            head,
            free: vec![head],
            max_free: Some(head),
        }
    }

    /// Number of regions, free and allocated.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn free_regions(&self) -> usize {
        self.free.len()
    }

    /// Size of the largest free region.
    pub fn max_free_size(&self) -> u64 {
        self.max_free.map_or(0, |key| self.records[key].size)
    }

    /// Check if nothing is allocated.
    pub fn is_unused(&self) -> bool {
        self.records.len() == 1 && self.records[self.head].free
    }

    pub fn occupancy(&self) -> Occupancy {
        self.records
            .iter()
            .fold(Occupancy::default(), |mut occupancy, (_, region)| {
                if region.free {
                    occupancy.free_regions += 1;
                } else {
                    occupancy.allocations += 1;
                    occupancy.allocated += region.size;
                }
                occupancy
            })
    }

    /// Regions in offset order as `(offset, size, free)`.
    #[cfg(test)]
    pub fn regions(&self) -> impl Iterator<Item = (u64, u64, bool)> + '_ {
        let mut cursor = Some(self.head);
        std::iter::from_fn(move || {
            let region = &self.records[cursor?];
            cursor = region.next;
            Some((region.offset, region.size, region.free))
        })
    }

    /// Carve `size` bytes aligned to `align` out of the smallest free region that can hold them.
    /// Returns `None` and leaves the state untouched if no free region fits.
    pub fn allocate(&mut self, size: u64, align: u64) -> Option<Carved> {
        debug_assert_ne!(size, 0, "Allocation can't be empty");
        debug_assert_ne!(align, 0, "Alignment must be non-zero");

        let max_free = self.max_free?;
        if self.records[max_free].size < size {
            return None;
        }

        let mut pick: Option<usize> = None;
        let mut second: Option<usize> = None;
        for &key in &self.free {
            let region = &self.records[key];

            if key != max_free && second.map_or(true, |s| region.size > self.records[s].size) {
                second = Some(key);
            }

            let fits = padding(region.offset, align)
                .checked_add(size)
                .map_or(false, |required| required <= region.size);

            if fits && pick.map_or(true, |p| region.size < self.records[p].size) {
                pick = Some(key);
            }
        }

        let pick = pick?;
        let region = self.records[pick];
        let pad = padding(region.offset, align);
        let offset = region.offset + pad;

        if pad == 0 && size == region.size {
            self.records[pick].free = false;
            self.remove_free(pick);
            if self.max_free == Some(pick) {
                self.max_free = second;
            }
            return Some(Carved {
                key: pick,
                offset,
                size,
            });
        }

        let key = self.records.insert(Suballocation {
            offset,
            size,
            free: false,
            prev: None,
            next: None,
        });
        self.link_before(pick, key);

        // Padding in front of the aligned offset stays free.
        // The picked region is preceded by an allocated one, so no free neighbours are created.
        let pad_key = if pad > 0 {
            let pad_key = self.records.insert(Suballocation {
                offset: region.offset,
                size: pad,
                free: true,
                prev: None,
                next: None,
            });
            self.link_before(key, pad_key);
            self.free.push(pad_key);
            Some(pad_key)
        } else {
            None
        };

        let rest = region.size - pad - size;
        let remainder = if rest == 0 {
            self.remove_free(pick);
            self.unlink(pick);
            self.records.remove(pick);
            None
        } else {
            let remainder = &mut self.records[pick];
            remainder.offset = offset + size;
            remainder.size = rest;
            Some(pick)
        };

        if self.max_free == Some(pick) {
            let records = &self.records;
            self.max_free = [second, remainder, pad_key]
                .iter()
                .filter_map(|&key| key)
                .max_by_key(|&key| records[key].size);
        }

        Some(Carved { key, offset, size })
    }

    /// Return allocated region to the free space, merging it with free neighbours.
    pub fn release(&mut self, key: usize) {
        let region = self.records[key];
        assert!(!region.free, "Suballocation {:?} is already free", region);

        let prev = region.prev.filter(|&prev| self.records[prev].free);
        let next = region.next.filter(|&next| self.records[next].free);

        let first = prev.unwrap_or(key);
        let offset = self.records[first].offset;
        let end = next.map_or(region.end(), |next| self.records[next].end());
        debug_assert_eq!(
            offset,
            self.records[first]
                .prev
                .map_or(0, |prev| self.records[prev].end()),
        );

        let mut absorbed = SmallVec::<[usize; 2]>::new();
        if prev.is_some() {
            absorbed.push(key);
        }
        absorbed.extend(next);

        for absorbed in absorbed {
            if self.records[absorbed].free {
                self.remove_free(absorbed);
            }
            self.unlink(absorbed);
            self.records.remove(absorbed);
            if self.max_free == Some(absorbed) {
                self.max_free = None;
            }
        }

        let size = end - offset;
        let merged = &mut self.records[first];
        merged.offset = offset;
        merged.size = size;
        if !merged.free {
            merged.free = true;
            self.free.push(first);
        }

        let records = &self.records;
        match self.max_free.map(|key| records[key].size) {
            Some(max_free) if max_free > size => {}
            _ => self.max_free = Some(first),
        }
    }

    /// Check all structural invariants.
    pub fn validate(&self) -> Result<(), failure::Error> {
        let mut cursor = Some(self.head);
        let mut prev: Option<usize> = None;
        let mut prev_free = false;
        let mut expected_offset = 0;
        let mut count = 0;
        let mut free_count = 0;
        let mut largest_free: Option<u64> = None;

        while let Some(key) = cursor {
            let region = self
                .records
                .get(key)
                .ok_or_else(|| format_err!("Dangling suballocation key {}", key))?;
            count += 1;

            ensure!(count <= self.records.len(), "Suballocation list has a cycle");
            ensure!(
                region.prev == prev,
                "Broken back link at {:?}, expected {:?}",
                region,
                prev
            );
            ensure!(
                region.offset == expected_offset,
                "Suballocation {:?} doesn't start where previous ends ({})",
                region,
                expected_offset
            );
            ensure!(region.size > 0, "Empty suballocation {:?}", region);
            ensure!(
                !(region.free && prev_free),
                "Adjacent free suballocations at {}",
                region.offset
            );

            if region.free {
                free_count += 1;
                ensure!(
                    self.free.contains(&key),
                    "Free suballocation {:?} is not in free list",
                    region
                );
                largest_free = Some(largest_free.map_or(region.size, |l| l.max(region.size)));
            }

            expected_offset = region.end();
            prev_free = region.free;
            prev = Some(key);
            cursor = region.next;
        }

        ensure!(
            expected_offset == self.size,
            "Suballocations cover {} bytes of {}",
            expected_offset,
            self.size
        );
        ensure!(
            count == self.records.len(),
            "{} suballocations are not linked",
            self.records.len() - count
        );
        ensure!(
            free_count == self.free.len(),
            "Free list has {} entries for {} free suballocations",
            self.free.len(),
            free_count
        );

        match (self.max_free, largest_free) {
            (None, None) => Ok(()),
            (Some(key), Some(largest))
                if self.records[key].free && self.records[key].size == largest =>
            {
                Ok(())
            }
            (hint, largest) => Err(format_err!(
                "Max free hint {:?} doesn't match largest free region {:?}",
                hint.map(|key| self.records[key]),
                largest
            )),
        }
    }

    fn remove_free(&mut self, key: usize) {
        if let Some(position) = self.free.iter().position(|&free| free == key) {
            self.free.remove(position);
        }
    }

    fn link_before(&mut self, at: usize, key: usize) {
        let prev = self.records[at].prev;
        {
            let record = &mut self.records[key];
            record.prev = prev;
            record.next = Some(at);
        }
        self.records[at].prev = Some(key);
        match prev {
            Some(prev) => self.records[prev].next = Some(key),
            None => self.head = key,
        }
    }

    fn unlink(&mut self, key: usize) {
        let Suballocation { prev, next, .. } = self.records[key];
        match prev {
            Some(prev) => self.records[prev].next = next,
            None => {
                self.head = next.expect("Block can't be left without suballocations");
            }
        }
        if let Some(next) = next {
            self.records[next].prev = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng},
    };

    fn allocate(subs: &mut Suballocations, size: u64, align: u64) -> Carved {
        let carved = subs
            .allocate(size, align)
            .unwrap_or_else(|| panic!("Failed to allocate {} aligned to {}", size, align));
        subs.validate().unwrap();
        carved
    }

    fn release(subs: &mut Suballocations, carved: Carved) {
        subs.release(carved.key);
        subs.validate().unwrap();
    }

    #[test]
    fn fresh_block_is_single_free_region() {
        let subs = Suballocations::new(1024);
        subs.validate().unwrap();
        assert!(subs.is_unused());
        assert_eq!(subs.regions().collect::<Vec<_>>(), vec![(0, 1024, true)]);
        assert_eq!(subs.max_free_size(), 1024);
    }

    #[test]
    fn picks_smallest_fitting_region() {
        let mut subs = Suballocations::new(115);
        let a = allocate(&mut subs, 10, 1);
        let _s1 = allocate(&mut subs, 5, 1);
        let b = allocate(&mut subs, 50, 1);
        let _s2 = allocate(&mut subs, 5, 1);
        let c = allocate(&mut subs, 20, 1);
        let _s3 = allocate(&mut subs, 25, 1);
        assert_eq!(subs.free_regions(), 0);
        assert_eq!(subs.allocate(1, 1), None);

        release(&mut subs, a);
        release(&mut subs, b);
        release(&mut subs, c);
        assert_eq!(subs.free_regions(), 3);
        assert_eq!(subs.max_free_size(), 50);

        let picked = allocate(&mut subs, 15, 1);
        assert_eq!(picked.offset, c.offset);
        assert_eq!(subs.max_free_size(), 50);
    }

    #[test]
    fn exact_fit_converts_in_place() {
        let mut subs = Suballocations::new(100);
        let a = allocate(&mut subs, 30, 1);
        let _b = allocate(&mut subs, 10, 1);
        release(&mut subs, a);

        let regions = subs.len();
        let c = allocate(&mut subs, 30, 1);
        assert_eq!(c.key, a.key);
        assert_eq!(c.offset, 0);
        assert_eq!(subs.len(), regions);
        assert_eq!(subs.max_free_size(), 60);
    }

    #[test]
    fn alignment_padding_stays_free() {
        let mut subs = Suballocations::new(256);
        let a = allocate(&mut subs, 10, 1);
        let b = allocate(&mut subs, 16, 64);
        assert_eq!(b.offset, 64);
        assert_eq!(
            subs.regions().collect::<Vec<_>>(),
            vec![(0, 10, false), (10, 54, true), (64, 16, false), (80, 176, true)]
        );

        // Releasing the first region merges it with the padding.
        release(&mut subs, a);
        assert_eq!(
            subs.regions().collect::<Vec<_>>(),
            vec![(0, 64, true), (64, 16, false), (80, 176, true)]
        );

        // Reclaimed padding is the best fit for an exactly sized request.
        let c = allocate(&mut subs, 64, 64);
        assert_eq!(c.offset, 0);
        assert_eq!(subs.free_regions(), 1);
    }

    #[test]
    fn rejects_without_side_effects() {
        let mut subs = Suballocations::new(100);
        let _a = allocate(&mut subs, 60, 1);
        assert_eq!(subs.allocate(50, 1), None);
        assert_eq!(subs.len(), 2);

        let mut subs = Suballocations::new(100);
        let _a = allocate(&mut subs, 1, 1);
        // Largest free region is big enough, but not once aligned.
        assert_eq!(subs.allocate(64, 64), None);
        assert_eq!(subs.len(), 2);
        subs.validate().unwrap();
    }

    #[test]
    fn release_merges_both_neighbours() {
        let mut subs = Suballocations::new(300);
        let a = allocate(&mut subs, 100, 1);
        let b = allocate(&mut subs, 100, 1);
        let c = allocate(&mut subs, 100, 1);
        release(&mut subs, a);
        release(&mut subs, c);
        assert_eq!(subs.free_regions(), 2);
        release(&mut subs, b);
        assert!(subs.is_unused());
        assert_eq!(subs.max_free_size(), 300);
    }

    #[test]
    #[should_panic]
    fn double_release_panics() {
        let mut subs = Suballocations::new(100);
        let a = allocate(&mut subs, 10, 1);
        let _b = allocate(&mut subs, 10, 1);
        subs.release(a.key);
        subs.release(a.key);
    }

    #[test]
    fn random_round_trip_coalesces() {
        const SIZE: u64 = 1 << 20;
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..8 {
            let mut subs = Suballocations::new(SIZE);
            let mut carved = Vec::new();

            for _ in 0..256 {
                let size = rng.gen_range(1..=8192);
                let align = 1 << rng.gen_range(0..9);
                if let Some(region) = subs.allocate(size, align) {
                    assert_eq!(region.offset % align, 0);
                    assert!(region.offset + region.size <= SIZE);
                    carved.push(region);
                }
                subs.validate().unwrap();

                // Interleave releases to exercise merging with live neighbours.
                if !carved.is_empty() && rng.gen_range(0..4) == 0 {
                    let index = rng.gen_range(0..carved.len());
                    release(&mut subs, carved.swap_remove(index));
                }
            }

            carved.shuffle(&mut rng);
            for region in carved {
                release(&mut subs, region);
            }

            assert!(subs.is_unused());
            assert_eq!(subs.regions().collect::<Vec<_>>(), vec![(0, SIZE, true)]);
            assert_eq!(subs.max_free_size(), SIZE);
        }
    }

    #[test]
    fn occupancy_counts_allocated_bytes() {
        let mut subs = Suballocations::new(256);
        let _a = allocate(&mut subs, 10, 1);
        let _b = allocate(&mut subs, 16, 64);
        assert_eq!(
            subs.occupancy(),
            Occupancy {
                allocated: 26,
                allocations: 2,
                free_regions: 2,
            }
        );
    }
}
