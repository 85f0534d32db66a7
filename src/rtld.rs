//! The top-level driver: one [`Rtld`] per simulated process.
//!
//! The simulator loads the primary executable into the image itself (it needs
//! the entry point and program headers anyway), then hands the executable's
//! `PT_DYNAMIC` address to [`Rtld::initiate`], which performs the entire
//! dynamic-linking job in one synchronous pass before simulated execution
//! starts. Afterwards the simulator reads back the initializer/finalizer
//! vectors and keeps the [`MemMap`] around to service `brk`/`mmap`/`munmap`
//! system calls.

use crate::image::TargetImage;
use crate::link::{LinkGraph, NodeId};
use crate::memmap::MemMap;
use crate::relmap::RelocationMap;
use crate::Result;

/// A loaded object as reported to the simulator.
#[derive(Clone, Debug)]
pub struct LoadedLibrary {
    /// `None` for the primary executable.
    pub soname: Option<String>,
    pub load_bias: u32,
    pub entry: u32,
}

/// The runtime dynamic linker.
#[derive(Debug)]
pub struct Rtld {
    mem_map: MemMap,
    relmap: RelocationMap,
    graph: LinkGraph,
}

impl Rtld {
    /// `word_size` is the target's word width in bytes; `mem_size` the size
    /// of the simulated memory. The relocation map is picked up from the
    /// library search path.
    pub fn new(word_size: usize, mem_size: u32) -> Self {
        Rtld {
            mem_map: MemMap::new(mem_size),
            relmap: RelocationMap::from_search_path(),
            graph: LinkGraph::new(word_size),
        }
    }

    /// Replaces the relocation map, for targets that configure it explicitly.
    pub fn with_relocation_map(mut self, relmap: RelocationMap) -> Self {
        self.relmap = relmap;
        self
    }

    /// Overrides the allocator's page size before any region is added.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.mem_map = MemMap::with_page_size(self.mem_map.mem_size(), page_size);
        self
    }

    /// Runs the whole load: registers the executable (occupying
    /// `[start_addr, start_addr + size)`, dynamic array at `dyn_addr`), loads
    /// every transitive dependency, adjusts, resolves, relocates and flushes
    /// the deferred copies. Returns the suggested heap start, which also
    /// seeds the program break.
    ///
    /// Any error leaves the image unusable for execution; the caller is
    /// expected to abort the simulation.
    pub fn initiate(
        &mut self,
        image: &mut TargetImage,
        dyn_addr: u32,
        start_addr: u32,
        size: u32,
    ) -> Result<u32> {
        self.graph.add_object(image, dyn_addr, 0, None, 0)?;
        self.mem_map.add_region(start_addr, size)?;
        self.graph.load_dependencies(image, &mut self.mem_map)?;

        let heap_ptr = self.mem_map.suggest_free_region(0);
        self.mem_map.set_brk(heap_ptr);

        self.graph.adjust_symbols(image, &self.relmap)?;
        self.graph.resolve_symbols(image)?;
        self.graph.apply_relocations(image, &self.relmap)?;
        self.graph.flush_pending_copies(image)?;

        log::debug!(
            "dynamic linking finished: {} object(s), heap at {heap_ptr:#x}",
            self.graph.len()
        );
        Ok(heap_ptr)
    }

    /// Initializer addresses the simulator must call before `main`, in load
    /// order.
    #[inline]
    pub fn init_addrs(&self) -> &[u32] {
        self.graph.init_addrs()
    }

    /// Finalizer addresses the simulator must call at exit.
    #[inline]
    pub fn fini_addrs(&self) -> &[u32] {
        self.graph.fini_addrs()
    }

    /// Every loaded object, executable first, in load order.
    pub fn objects(&self) -> Vec<LoadedLibrary> {
        self.graph
            .nodes()
            .map(|node| LoadedLibrary {
                soname: node.soname().map(str::to_owned),
                load_bias: node.load_bias(),
                entry: node.entry(),
            })
            .collect()
    }

    /// The executable's node, present after a successful [`Rtld::initiate`].
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    #[inline]
    pub fn mem_map(&self) -> &MemMap {
        &self.mem_map
    }

    /// Mutable access for servicing the target's memory system calls.
    #[inline]
    pub fn mem_map_mut(&mut self) -> &mut MemMap {
        &mut self.mem_map
    }
}
