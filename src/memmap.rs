//! Free/used bookkeeping for the simulated target address space.
//!
//! [`MemMap`] tracks which ranges of `[0, mem_size)` are occupied by loaded
//! objects or anonymous mappings, suggests placement addresses for shared
//! libraries, and services the simulator's `brk`/`mmap`/`munmap` system calls.
//! All operations are page-granular; the page size is host configuration, not
//! a property of the target ISA.

use crate::{Result, image_error};

/// Sentinel returned by [`MemMap::mmap_anon`] when no region can be found,
/// mirroring the target's `MAP_FAILED`.
pub const MAP_FAILED: u32 = 0xffff_ffff;

const DEFAULT_PAGE_SIZE: u32 = 4096;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Status {
    Free,
    Used,
}

#[derive(Clone, Copy, Debug)]
struct Range {
    start: u32,
    size: u32,
    status: Status,
}

impl Range {
    fn end(&self) -> u32 {
        self.start + self.size
    }
}

/// Ordered free/used ranges covering the whole target memory.
///
/// Invariant: the ranges partition `[0, mem_size)` in address order, and no
/// two adjacent `Free` ranges exist after any mutation.
#[derive(Debug)]
pub struct MemMap {
    ranges: Vec<Range>,
    mem_size: u32,
    page_size: u32,
    brk: u32,
    warned_exhausted: bool,
}

impl MemMap {
    pub fn new(mem_size: u32) -> Self {
        Self::with_page_size(mem_size, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(mem_size: u32, page_size: u32) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        MemMap {
            ranges: vec![Range {
                start: 0,
                size: mem_size,
                status: Status::Free,
            }],
            mem_size,
            page_size,
            brk: 0,
            warned_exhausted: false,
        }
    }

    #[inline]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    #[inline]
    pub fn mem_size(&self) -> u32 {
        self.mem_size
    }

    fn page_align_up(&self, addr: u32) -> u32 {
        (addr + self.page_size - 1) & !(self.page_size - 1)
    }

    fn page_align_down(&self, addr: u32) -> u32 {
        addr & !(self.page_size - 1)
    }

    /// Marks `[start, start + size)` used. `size` is rounded up to a whole
    /// number of pages. Fails if the region does not fit below the configured
    /// memory size or collides with an already used range.
    pub fn add_region(&mut self, start: u32, size: u32) -> Result<()> {
        let size = self.page_align_up(size.max(1));
        let end = start
            .checked_add(size)
            .filter(|end| *end <= self.mem_size)
            .ok_or_else(|| {
                image_error(format!(
                    "region [{start:#x}, +{size:#x}) does not fit into target memory of {:#x} bytes",
                    self.mem_size
                ))
            })?;
        if !self.is_free(start, size) {
            return Err(image_error(format!(
                "region [{start:#x}, {end:#x}) overlaps an already used region"
            )));
        }
        self.carve(start, size, Status::Used);
        Ok(())
    }

    /// First page-aligned address past the last used range; used for
    /// sequential library placement. The `size` argument is accepted for
    /// symmetry with the target's allocation calls but does not influence the
    /// suggestion.
    pub fn suggest_free_region(&self, _size: u32) -> u32 {
        self.ranges
            .iter()
            .rev()
            .find(|range| range.status == Status::Used)
            .map(|range| self.page_align_up(range.end()))
            .unwrap_or(0)
    }

    /// True when `[addr, addr + size)` lies inside the target memory and
    /// crosses no used range.
    pub fn verify_region_availability(&self, addr: u32, size: u32) -> bool {
        addr.checked_add(size).is_some_and(|end| end <= self.mem_size)
            && self.is_free(addr, size)
    }

    /// Allocates an anonymous region. With `addr == 0` the allocator picks a
    /// placement itself: the midpoint between the program break and the top of
    /// memory, falling back to immediately above the break when the midpoint
    /// is occupied. A caller-supplied address is verified instead. Returns
    /// [`MAP_FAILED`] when the space is exhausted, warning once.
    pub fn mmap_anon(&mut self, addr: u32, size: u32) -> u32 {
        let size = self.page_align_up(size.max(1));
        let chosen = if addr != 0 {
            let addr = self.page_align_down(addr);
            self.verify_region_availability(addr, size).then_some(addr)
        } else {
            let mid = self.page_align_down(self.brk / 2 + self.mem_size / 2);
            let above_brk = self.page_align_up(self.brk);
            [mid, above_brk]
                .into_iter()
                .find(|candidate| self.verify_region_availability(*candidate, size))
        };
        match chosen {
            Some(start) => {
                self.carve(start, size, Status::Used);
                start
            }
            None => {
                if !self.warned_exhausted {
                    self.warned_exhausted = true;
                    log::warn!(
                        "target address space exhausted: cannot place an anonymous mapping of {size:#x} bytes"
                    );
                }
                MAP_FAILED
            }
        }
    }

    /// Frees the used region starting at `addr`, but only when the caller's
    /// claimed size does not exceed the tracked region's extent. The whole
    /// tracked region is released.
    pub fn munmap(&mut self, addr: u32, size: u32) -> bool {
        let addr = self.page_align_down(addr);
        let size = self.page_align_up(size.max(1));
        let Some(idx) = self
            .ranges
            .iter()
            .position(|range| range.status == Status::Used && range.start == addr)
        else {
            return false;
        };
        if size > self.ranges[idx].size {
            return false;
        }
        self.ranges[idx].status = Status::Free;
        self.merge_free();
        true
    }

    /// Moves the program break. The break only moves within the free gap that
    /// currently contains it: a request colliding with a used range at or
    /// above the break, or dropping below the used range underneath it, is
    /// rejected and the break is returned unchanged. `brk(0)` queries.
    pub fn brk(&mut self, addr: u32) -> u32 {
        if addr == 0 {
            return self.brk;
        }
        let gap = self
            .ranges
            .iter()
            .find(|range| range.status == Status::Free && range.start <= self.brk && self.brk <= range.end());
        if let Some(gap) = gap
            && addr >= gap.start
            && addr <= gap.end()
        {
            self.brk = addr;
        }
        self.brk
    }

    /// Initialises the program break, done once by the driver after all
    /// objects are placed.
    pub fn set_brk(&mut self, addr: u32) {
        self.brk = addr;
    }

    /// Used ranges in address order, for the simulator and for tests.
    pub fn used_regions(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.ranges
            .iter()
            .filter(|range| range.status == Status::Used)
            .map(|range| (range.start, range.size))
    }

    fn is_free(&self, start: u32, size: u32) -> bool {
        let end = match start.checked_add(size) {
            Some(end) => end,
            None => return false,
        };
        self.ranges
            .iter()
            .filter(|range| range.status == Status::Used)
            .all(|range| range.end() <= start || range.start >= end)
    }

    /// Replaces `[start, start + size)` with a single range of `status`,
    /// splitting whatever free ranges covered it, then restores the
    /// no-adjacent-free invariant.
    fn carve(&mut self, start: u32, size: u32, status: Status) {
        let end = start + size;
        let mut rebuilt = Vec::with_capacity(self.ranges.len() + 2);
        for range in &self.ranges {
            if range.end() <= start || range.start >= end {
                rebuilt.push(*range);
                continue;
            }
            if range.start < start {
                rebuilt.push(Range {
                    start: range.start,
                    size: start - range.start,
                    status: range.status,
                });
            }
            if range.end() > end {
                rebuilt.push(Range {
                    start: end,
                    size: range.end() - end,
                    status: range.status,
                });
            }
        }
        rebuilt.push(Range { start, size, status });
        rebuilt.sort_by_key(|range| range.start);
        self.ranges = rebuilt;
        self.merge_free();
    }

    fn merge_free(&mut self) {
        let mut merged: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for range in &self.ranges {
            if let Some(last) = merged.last_mut()
                && last.status == Status::Free
                && range.status == Status::Free
                && last.end() == range.start
            {
                last.size += range.size;
                continue;
            }
            merged.push(*range);
        }
        self.ranges = merged;
    }
}
