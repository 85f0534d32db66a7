//! The graph of loaded objects and the relocation engine.
//!
//! Nodes live in an arena (`Vec<LinkNode>`, addressed by [`NodeId`]); node 0
//! is always the primary executable. Linking runs in phases over the whole
//! graph, each node tracking its own [`LinkState`] so a phase can be re-entered
//! without repeating work:
//!
//! 1. dependency loading (breadth-first worklist over `DT_NEEDED`),
//! 2. symbol adjustment (rebase definitions by the load bias, schedule
//!    deferred copy relocations),
//! 3. symbol resolution (graph-wide lookup, executable first),
//! 4. relocation application,
//! 5. flushing the deferred copies.

use elf::abi::{
    DT_FINI, DT_HASH, DT_INIT, DT_JMPREL, DT_PLTREL, DT_PLTRELSZ, DT_REL, DT_STRTAB, DT_SYMTAB,
    DT_VERDEF, DT_VERNEED, DT_VERSYM, SHN_UNDEF, STB_GLOBAL, STB_WEAK, STT_OBJECT,
};

use crate::dynamic::DynamicInfo;
use crate::image::TargetImage;
use crate::memmap::MemMap;
use crate::object;
use crate::reloc::{DynamicRelocations, R_COPY, RelFormat, RelocKind, r_sym, r_type};
use crate::relmap::RelocationMap;
use crate::symbol::{SymbolView, is_linkable_type, st_bind, st_type};
use crate::symtab::{DynamicSymbolTable, VERSYM_HIDDEN, elf_hash};
use crate::{
    Result, missing_library, parse_dynamic_error, unknown_relocation, unresolved_symbol,
    version_mismatch,
};

/// Index of a node in the graph's arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeId(usize);

impl NodeId {
    /// The primary executable.
    pub const ROOT: NodeId = NodeId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Per-node linking progress, advanced strictly in order by the phase methods.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum LinkState {
    DynamicLoaded,
    DepsLoaded,
    SymbolsAdjusted,
    SymbolsResolved,
    Relocated,
}

/// A copy relocation recorded during symbol adjustment and performed after
/// every node is relocated, so the source bytes are final when copied.
#[derive(Clone, Copy, Debug)]
struct PendingCopy {
    dst: u32,
    src: u32,
    len: u32,
}

/// One loaded object: the executable or a shared library.
#[derive(Debug)]
pub struct LinkNode {
    soname: Option<String>,
    load_bias: u32,
    entry: u32,
    dyn_info: DynamicInfo,
    symtab: DynamicSymbolTable,
    relocs: Option<DynamicRelocations>,
    state: LinkState,
}

impl LinkNode {
    /// `None` for the primary executable.
    #[inline]
    pub fn soname(&self) -> Option<&str> {
        self.soname.as_deref()
    }

    #[inline]
    pub fn load_bias(&self) -> u32 {
        self.load_bias
    }

    #[inline]
    pub fn entry(&self) -> u32 {
        self.entry
    }
}

/// The arena of loaded objects plus the cross-object linking state.
#[derive(Debug)]
pub struct LinkGraph {
    nodes: Vec<LinkNode>,
    pending_copies: Vec<PendingCopy>,
    init_addrs: Vec<u32>,
    fini_addrs: Vec<u32>,
    word_size: usize,
}

impl LinkGraph {
    /// `word_size` is the target's natural word width in bytes, the width
    /// written by full-word relocations.
    pub fn new(word_size: usize) -> Self {
        LinkGraph {
            nodes: Vec::new(),
            pending_copies: Vec::new(),
            init_addrs: Vec::new(),
            fini_addrs: Vec::new(),
            word_size,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &LinkNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &LinkNode> {
        self.nodes.iter()
    }

    /// Initializer addresses, in object load order.
    #[inline]
    pub fn init_addrs(&self) -> &[u32] {
        &self.init_addrs
    }

    /// Finalizer addresses, in object load order.
    #[inline]
    pub fn fini_addrs(&self) -> &[u32] {
        &self.fini_addrs
    }

    /// Registers an object whose segments are already in the image.
    ///
    /// Parses the dynamic array at `dyn_addr`, rebases the table addresses by
    /// `load_bias` (including the stored `DT_STRTAB` value, which dependency
    /// loading reads back), builds the symbol-table view, locates the
    /// relocation records and registers the object's initializer/finalizer.
    pub fn add_object(
        &mut self,
        image: &TargetImage,
        dyn_addr: u32,
        load_bias: u32,
        soname: Option<String>,
        entry: u32,
    ) -> Result<NodeId> {
        let mut dyn_info = DynamicInfo::load(image, dyn_addr)?;
        let biased = |tag: i64| match dyn_info.value_or_zero(tag) {
            0 => 0,
            addr => addr.wrapping_add(load_bias),
        };
        let hash_addr = biased(DT_HASH);
        let symtab_addr = biased(DT_SYMTAB);
        let strtab_addr = biased(DT_STRTAB);
        let verdef_addr = biased(DT_VERDEF);
        let verneed_addr = biased(DT_VERNEED);
        let versym_addr = biased(DT_VERSYM);
        if hash_addr == 0 || symtab_addr == 0 || strtab_addr == 0 {
            return Err(parse_dynamic_error(format!(
                "object at {dyn_addr:#x} lacks a hash table, symbol table or string table"
            )));
        }
        dyn_info.set_value(DT_STRTAB, strtab_addr);

        let symtab = DynamicSymbolTable::setup(
            image,
            hash_addr,
            symtab_addr,
            strtab_addr,
            verdef_addr,
            verneed_addr,
            versym_addr,
        )?;
        let relocs = locate_relocations(&dyn_info, load_bias);

        // The runtime linker itself is a stand-in on a simulated target; its
        // initializer must not run.
        let stand_in = soname
            .as_deref()
            .map(object::strip_path)
            .is_some_and(is_runtime_linker);
        if !stand_in {
            if let Some(init) = dyn_info.value(DT_INIT) {
                self.init_addrs.push(init.wrapping_add(load_bias));
            }
            if let Some(fini) = dyn_info.value(DT_FINI) {
                self.fini_addrs.push(fini.wrapping_add(load_bias));
            }
        }

        let id = NodeId(self.nodes.len());
        log::debug!(
            "object {} ({}) registered at bias {load_bias:#x}, {} relocation(s)",
            id.0,
            soname.as_deref().unwrap_or("<executable>"),
            relocs.map_or(0, |r| r.count()),
        );
        self.nodes.push(LinkNode {
            soname,
            load_bias,
            entry,
            dyn_info,
            symtab,
            relocs,
            state: LinkState::DynamicLoaded,
        });
        Ok(id)
    }

    /// Loads every transitive `DT_NEEDED` dependency into the image.
    ///
    /// Worklist over the arena, so libraries appended by one iteration get
    /// their own dependencies processed later. A soname already present in the
    /// graph (path-stripped comparison) is not loaded again, which also breaks
    /// dependency cycles. Each requester's version requirements are checked
    /// against the dependency's definitions as soon as the dependency is
    /// available; a stale library fails the whole load here, before any symbol
    /// resolution. Idempotent: nodes past this phase are skipped.
    pub fn load_dependencies(
        &mut self,
        image: &mut TargetImage,
        mem_map: &mut MemMap,
    ) -> Result<()> {
        let mut idx = 0;
        while idx < self.nodes.len() {
            if self.nodes[idx].state >= LinkState::DepsLoaded {
                idx += 1;
                continue;
            }
            let strtab_addr = self.nodes[idx].dyn_info.value_or_zero(DT_STRTAB);
            let needed: Vec<String> = self.nodes[idx]
                .dyn_info
                .needed()
                .map(|offset| {
                    Ok(String::from_utf8_lossy(image.read_cstr(strtab_addr + offset)?).into_owned())
                })
                .collect::<Result<_>>()?;
            let requester_verneed = self.nodes[idx].symtab.verneed().copied();

            for name in needed {
                let soname = object::strip_path(&name).to_owned();
                let dep = match self.find_node(&soname) {
                    Some(dep) => dep,
                    None => {
                        // The full DT_NEEDED string may carry a directory; the
                        // stripped soname is only the object's identity.
                        let path = object::locate_file(&name)
                            .ok_or_else(|| missing_library(soname.clone()))?;
                        let bias = mem_map.suggest_free_region(0);
                        let loaded = object::load_object(&path, &soname, image, bias)?;
                        if loaded.dyn_addr == 0 || loaded.dyn_size == 0 {
                            return Err(parse_dynamic_error(format!(
                                "shared library \"{soname}\" has no DYNAMIC segment"
                            )));
                        }
                        mem_map.add_region(bias, loaded.total_size)?;
                        self.add_object(
                            image,
                            loaded.dyn_addr,
                            bias,
                            Some(soname.clone()),
                            loaded.entry,
                        )?
                    }
                };
                if let Some(verneed) = requester_verneed {
                    let defs = self.nodes[dep.0].symtab.verdefs().copied();
                    if let Some(missing) =
                        verneed.unsatisfied(image, soname.as_bytes(), defs.as_ref())?
                    {
                        log::debug!(
                            "\"{soname}\" does not define required version \"{}\"",
                            String::from_utf8_lossy(&missing)
                        );
                        return Err(version_mismatch(soname));
                    }
                }
            }
            self.nodes[idx].state = LinkState::DepsLoaded;
            idx += 1;
        }
        Ok(())
    }

    /// Rebases every defined symbol of every shifted object by its load bias.
    ///
    /// A data symbol the executable takes a copy relocation against is
    /// redirected instead: its value becomes the copy destination inside the
    /// executable, so every reference graph-wide binds to the single copied
    /// instance, and the byte copy itself is deferred until after relocation.
    pub fn adjust_symbols(
        &mut self,
        image: &mut TargetImage,
        relmap: &RelocationMap,
    ) -> Result<()> {
        let mut pending = Vec::new();
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].state != LinkState::DepsLoaded {
                continue;
            }
            let bias = self.nodes[idx].load_bias;
            if bias == 0 {
                self.nodes[idx].state = LinkState::SymbolsAdjusted;
                continue;
            }
            let symtab_addr = self.nodes[idx].symtab.symtab_addr();
            let count = self.nodes[idx].symtab.num_symbols();
            for sym_index in 1..count {
                let sym = SymbolView::at(symtab_addr, sym_index);
                let value = sym.value(image)?;
                if value == 0 || sym.shndx(image)? == SHN_UNDEF {
                    continue;
                }
                if st_type(sym.info(image)?) == STT_OBJECT {
                    let name = self.nodes[idx].symtab.symbol_name(image, sym_index)?.to_vec();
                    if let Some(dst) = self.find_copy_relocation(image, relmap, &name)? {
                        pending.push(PendingCopy {
                            dst,
                            src: bias.wrapping_add(value),
                            len: sym.size(image)?,
                        });
                        sym.set_value(image, dst)?;
                        log::trace!(
                            "symbol \"{}\" redirected to copy target {dst:#x}",
                            String::from_utf8_lossy(&name)
                        );
                        continue;
                    }
                }
                sym.set_value(image, value.wrapping_add(bias))?;
            }
            self.nodes[idx].state = LinkState::SymbolsAdjusted;
        }
        self.pending_copies.extend(pending);
        Ok(())
    }

    /// Binds every undefined symbol referenced by a relocation record.
    ///
    /// The search walks the whole graph in load order, executable first, and
    /// copies the winning definition's value, size, info and section index
    /// over the undefined record, so later relocations against the same symbol
    /// see it as defined. An unbound weak symbol keeps its zero value; an
    /// unbound global one fails the load.
    pub fn resolve_symbols(&mut self, image: &mut TargetImage) -> Result<()> {
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].state != LinkState::SymbolsAdjusted {
                continue;
            }
            let Some(relocs) = self.nodes[idx].relocs else {
                self.nodes[idx].state = LinkState::SymbolsResolved;
                continue;
            };
            let symtab_addr = self.nodes[idx].symtab.symtab_addr();
            for i in 0..relocs.count() {
                let sym_index = r_sym(relocs.info(image, i)?);
                if sym_index == 0 {
                    continue;
                }
                let sym = SymbolView::at(symtab_addr, sym_index);
                let info = sym.info(image)?;
                if !is_linkable_type(st_type(info)) {
                    continue;
                }
                let bind = st_bind(info);
                if bind != STB_GLOBAL && bind != STB_WEAK {
                    continue;
                }
                if sym.shndx(image)? != SHN_UNDEF {
                    continue;
                }

                let name = self.nodes[idx].symtab.symbol_name(image, sym_index)?.to_vec();
                let hash = elf_hash(&name);
                let verndx =
                    self.nodes[idx].symtab.version_index(image, sym_index)? & !VERSYM_HIDDEN;
                // Indices 0 and 1 are the unversioned local/global markers.
                let version = match self.nodes[idx].symtab.verneed() {
                    Some(verneed) if verndx > 1 => verneed.lookup_version(image, verndx)?,
                    _ => None,
                };

                let mut resolved = false;
                for def_node in &self.nodes {
                    let Some(def_index) =
                        def_node.symtab.lookup(image, hash, &name, version.as_ref())?
                    else {
                        continue;
                    };
                    let def = SymbolView::at(def_node.symtab.symtab_addr(), def_index);
                    let value = def.value(image)?;
                    let size = def.size(image)?;
                    let def_info = def.info(image)?;
                    let shndx = def.shndx(image)?;
                    sym.set_value(image, value)?;
                    sym.set_size(image, size)?;
                    sym.set_info(image, def_info)?;
                    sym.set_shndx(image, shndx)?;
                    log::trace!(
                        "symbol \"{}\" bound to {value:#x} in {}",
                        String::from_utf8_lossy(&name),
                        def_node.soname.as_deref().unwrap_or("<executable>")
                    );
                    resolved = true;
                    break;
                }
                if !resolved {
                    if bind == STB_WEAK {
                        log::debug!(
                            "weak symbol \"{}\" left unresolved",
                            String::from_utf8_lossy(&name)
                        );
                        continue;
                    }
                    return Err(unresolved_symbol(String::from_utf8_lossy(&name).into_owned()));
                }
            }
            self.nodes[idx].state = LinkState::SymbolsResolved;
        }
        Ok(())
    }

    /// Applies every node's relocation records to the image.
    ///
    /// Each record's code is first translated through the relocation map (an
    /// unmapped code passes through unmodified); a code with no canonical
    /// meaning fails the load. RELATIVE reads the word already stored at the
    /// target and adds the bias, in both record formats; the absolute and
    /// pc-relative kinds use only the record's explicit addend, so
    /// implicit-addend records contribute 0. Full-word kinds write the
    /// graph's word size; arithmetic wraps, matching the target's own
    /// overflow behavior. Copy relocations were already turned into deferred
    /// byte copies and are no-ops here.
    pub fn apply_relocations(
        &mut self,
        image: &mut TargetImage,
        relmap: &RelocationMap,
    ) -> Result<()> {
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].state != LinkState::SymbolsResolved {
                continue;
            }
            let Some(relocs) = self.nodes[idx].relocs else {
                self.nodes[idx].state = LinkState::Relocated;
                continue;
            };
            let bias = self.nodes[idx].load_bias;
            let symtab_addr = self.nodes[idx].symtab.symtab_addr();
            for i in 0..relocs.count() {
                let info = relocs.info(image, i)?;
                let raw = r_type(info);
                let code = relmap.translate(raw).unwrap_or(raw);
                let kind = RelocKind::from_code(code).ok_or_else(|| unknown_relocation(code))?;
                let target = bias.wrapping_add(relocs.offset(image, i)?);
                let addend = relocs.addend(image, i)? as u32;
                let sym_value = SymbolView::at(symtab_addr, r_sym(info)).value(image)?;
                log::trace!("relocation code {code} at {target:#x} (sym value {sym_value:#x})");

                match kind {
                    RelocKind::None | RelocKind::Copy => {}
                    RelocKind::Relative => {
                        let word = image.read(target, self.word_size)?.wrapping_add(bias);
                        image.write(target, self.word_size, word)?;
                    }
                    RelocKind::JumpSlot | RelocKind::GlobDat => {
                        image.write(target, self.word_size, sym_value.wrapping_add(addend))?;
                    }
                    RelocKind::Abs8 | RelocKind::Abs16 | RelocKind::Abs32 => {
                        let width = absolute_width(kind);
                        image.write(target, width, sym_value.wrapping_add(addend))?;
                    }
                    RelocKind::Rel8 | RelocKind::Rel16 | RelocKind::Rel32 => {
                        let width = relative_width(kind);
                        image.write(
                            target,
                            width,
                            sym_value.wrapping_add(addend).wrapping_sub(target),
                        )?;
                    }
                }
            }
            self.nodes[idx].state = LinkState::Relocated;
        }
        Ok(())
    }

    /// Performs the deferred copy relocations. Called once, after every node
    /// is relocated, so the copied bytes are their final values.
    pub fn flush_pending_copies(&mut self, image: &mut TargetImage) -> Result<()> {
        for copy in self.pending_copies.drain(..) {
            log::trace!(
                "copying {:#x} byte(s) from {:#x} to {:#x}",
                copy.len,
                copy.src,
                copy.dst
            );
            image.copy_within(copy.src, copy.dst, copy.len)?;
        }
        Ok(())
    }

    /// First copy relocation of the executable whose symbol is named `name`;
    /// yields the (biased) destination address.
    fn find_copy_relocation(
        &self,
        image: &TargetImage,
        relmap: &RelocationMap,
        name: &[u8],
    ) -> Result<Option<u32>> {
        let root = &self.nodes[NodeId::ROOT.0];
        let Some(relocs) = root.relocs else {
            return Ok(None);
        };
        for i in 0..relocs.count() {
            let info = relocs.info(image, i)?;
            let raw = r_type(info);
            if relmap.translate(raw).unwrap_or(raw) != R_COPY {
                continue;
            }
            if root.symtab.symbol_name(image, r_sym(info))? == name {
                return Ok(Some(root.load_bias.wrapping_add(relocs.offset(image, i)?)));
            }
        }
        Ok(None)
    }

    fn find_node(&self, soname: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.soname.as_deref().map(object::strip_path) == Some(soname))
            .map(NodeId)
    }
}

/// Locates the object's relocation records from its dynamic entries.
///
/// `DT_PLTREL` names the record format; the records themselves sit at the
/// matching `DT_REL`/`DT_RELA` address, or at `DT_JMPREL` when the object only
/// carries PLT relocations. The non-PLT and PLT tables are contiguous in the
/// objects this loader accepts, so their sizes simply add up.
fn locate_relocations(dyn_info: &DynamicInfo, load_bias: u32) -> Option<DynamicRelocations> {
    let pltrel = dyn_info.value_or_zero(DT_PLTREL);
    if pltrel == 0 {
        return None;
    }
    let format = if i64::from(pltrel) == DT_REL {
        RelFormat::Rel
    } else {
        RelFormat::Rela
    };
    let mut addr = dyn_info.value_or_zero(i64::from(pltrel));
    if addr == 0 {
        addr = dyn_info.value_or_zero(DT_JMPREL);
    }
    // DT_RELSZ and DT_RELASZ both immediately follow their table's tag.
    let size = dyn_info
        .value_or_zero(i64::from(pltrel) + 1)
        .wrapping_add(dyn_info.value_or_zero(DT_PLTRELSZ));
    if addr == 0 || size == 0 {
        return None;
    }
    Some(DynamicRelocations::new(
        addr.wrapping_add(load_bias),
        size / format.entry_size(),
        format,
    ))
}

fn absolute_width(kind: RelocKind) -> usize {
    match kind {
        RelocKind::Abs8 => 1,
        RelocKind::Abs16 => 2,
        _ => 4,
    }
}

fn relative_width(kind: RelocKind) -> usize {
    match kind {
        RelocKind::Rel8 => 1,
        RelocKind::Rel16 => 2,
        _ => 4,
    }
}

/// The target's runtime linker is never actually executed under simulation,
/// so its initializer and finalizer must not be registered.
fn is_runtime_linker(soname: &str) -> bool {
    soname.starts_with("ld.so") || soname.starts_with("ld-linux")
}
