//! ELF-hash symbol lookup with version and weak-binding disambiguation.
//!
//! One [`DynamicSymbolTable`] per loaded object, a non-owning view over the
//! object's (already biased) hash table, symbol array, string table and
//! optional version tables. Cross-object search order is the link graph's
//! business; this module only ever scans a single object's chain.

use elf::abi::{SHN_UNDEF, STB_WEAK, STV_DEFAULT};

use crate::image::TargetImage;
use crate::symbol::{SymbolView, is_linkable_type, st_bind, st_type, st_visibility};
use crate::version::{VersionDefinitions, VersionNeeded, VersionTag};
use crate::{Result, parse_dynamic_error};

/// Bit marking a `versym` entry as hidden.
pub const VERSYM_HIDDEN: u16 = 0x8000;

/// The hash-function of the ELF ABI, applied to symbol and version names.
pub fn elf_hash(name: &[u8]) -> u32 {
    let mut hash = 0u32;
    for byte in name {
        hash = (hash << 4).wrapping_add(u32::from(*byte));
        let hi = hash & 0xf000_0000;
        hash ^= hi;
        hash ^= hi >> 24;
    }
    hash
}

/// Non-owning view over one object's dynamic symbol information.
#[derive(Debug)]
pub struct DynamicSymbolTable {
    symtab_addr: u32,
    strtab_addr: u32,
    buckets_addr: u32,
    chain_addr: u32,
    nbuckets: u32,
    nchain: u32,
    /// 0 when the object carries no `versym` array.
    versym_addr: u32,
    verneed: Option<VersionNeeded>,
    verdefs: Option<VersionDefinitions>,
}

impl DynamicSymbolTable {
    /// Establishes the views. All addresses are absolute (already biased);
    /// zero marks an absent version table.
    pub fn setup(
        image: &TargetImage,
        hash_addr: u32,
        symtab_addr: u32,
        strtab_addr: u32,
        verdef_addr: u32,
        verneed_addr: u32,
        versym_addr: u32,
    ) -> Result<DynamicSymbolTable> {
        let nbuckets = image.read(hash_addr, 4)?;
        let nchain = image.read(hash_addr + 4, 4)?;
        if nbuckets == 0 {
            return Err(parse_dynamic_error(format!(
                "hash table at {hash_addr:#x} has no buckets"
            )));
        }
        Ok(DynamicSymbolTable {
            symtab_addr,
            strtab_addr,
            buckets_addr: hash_addr + 8,
            chain_addr: hash_addr + 8 + 4 * nbuckets,
            nbuckets,
            nchain,
            versym_addr,
            verneed: (verneed_addr != 0).then(|| VersionNeeded::new(verneed_addr, strtab_addr)),
            verdefs: (verdef_addr != 0)
                .then(|| VersionDefinitions::new(verdef_addr, strtab_addr)),
        })
    }

    /// Number of symbol records (the chain array parallels the symbol table).
    #[inline]
    pub fn num_symbols(&self) -> u32 {
        self.nchain
    }

    #[inline]
    pub fn symtab_addr(&self) -> u32 {
        self.symtab_addr
    }

    #[inline]
    pub fn verneed(&self) -> Option<&VersionNeeded> {
        self.verneed.as_ref()
    }

    #[inline]
    pub fn verdefs(&self) -> Option<&VersionDefinitions> {
        self.verdefs.as_ref()
    }

    /// The symbol's name, read from the dynamic string table.
    pub fn symbol_name<'img>(&self, image: &'img TargetImage, index: u32) -> Result<&'img [u8]> {
        let name_off = SymbolView::at(self.symtab_addr, index).name_index(image)?;
        image.read_cstr(self.strtab_addr + name_off)
    }

    /// The symbol's `versym` entry, 0 when the object has none.
    pub fn version_index(&self, image: &TargetImage, index: u32) -> Result<u16> {
        if self.versym_addr == 0 || index >= self.nchain {
            return Ok(0);
        }
        Ok(image.read(self.versym_addr + 2 * index, 2)? as u16)
    }

    /// Walks the hash chain for `name` and returns the index of the matching
    /// definition, or `None`.
    ///
    /// A candidate is eligible only if its value is non-zero, its section is
    /// defined, its type is data/function/common/untyped and its visibility is
    /// default. Version disambiguation:
    /// * a versioned request against an unversioned object is accepted as-is
    ///   (best-effort compatibility with unversioned libraries);
    /// * a versioned request against a versioned object must resolve the
    ///   candidate's version index to a definition whose name and hash equal
    ///   the request, and hidden (`0x8000`) entries are rejected;
    /// * a version-less request against a versioned object accepts only the
    ///   base definition (index 1 or 2), unless the whole chain holds exactly
    ///   one definition of the name, which is then accepted after the scan;
    /// * a weak candidate is held back and returned only when the walk finds
    ///   no stronger one.
    pub fn lookup(
        &self,
        image: &TargetImage,
        hash: u32,
        name: &[u8],
        version: Option<&VersionTag>,
    ) -> Result<Option<u32>> {
        let mut weak_match = None;
        let mut last_match = None;
        let mut is_unique_match = true;

        let mut index = image.read(self.buckets_addr + 4 * (hash % self.nbuckets), 4)?;
        while index != 0 {
            if let Some(found) =
                self.check_symbol(image, index, name, version, &mut weak_match, &mut last_match, &mut is_unique_match)?
            {
                return Ok(Some(found));
            }
            index = image.read(self.chain_addr + 4 * index, 4)?;
        }

        if last_match.is_some() && is_unique_match {
            return Ok(last_match);
        }
        Ok(weak_match)
    }

    /// One candidate of the chain walk; returns the index on a definite match
    /// and records weak/unique bookkeeping otherwise.
    #[allow(clippy::too_many_arguments)]
    fn check_symbol(
        &self,
        image: &TargetImage,
        index: u32,
        name: &[u8],
        version: Option<&VersionTag>,
        weak_match: &mut Option<u32>,
        last_match: &mut Option<u32>,
        is_unique_match: &mut bool,
    ) -> Result<Option<u32>> {
        let sym = SymbolView::at(self.symtab_addr, index);

        if sym.value(image)? == 0 || sym.shndx(image)? == SHN_UNDEF {
            return Ok(None);
        }
        if !is_linkable_type(st_type(sym.info(image)?)) {
            return Ok(None);
        }
        // A hidden symbol does not want to be found.
        if st_visibility(sym.other(image)?) != STV_DEFAULT {
            return Ok(None);
        }
        if self.symbol_name(image, index)? != name {
            return Ok(None);
        }

        // Second name match in this chain: more than one version of the
        // symbol exists.
        if last_match.is_some() {
            *is_unique_match = false;
        }

        match version {
            Some(request) => {
                if self.versym_addr != 0
                    && let Some(verdefs) = &self.verdefs
                {
                    let verndx = self.version_index(image, index)?;
                    if verndx & VERSYM_HIDDEN != 0 {
                        return Ok(None);
                    }
                    let def = verdefs
                        .by_index(image, verndx & !VERSYM_HIDDEN)?
                        .ok_or_else(|| {
                            parse_dynamic_error(format!(
                                "versym entry {verndx} has no matching version definition"
                            ))
                        })?;
                    if def.hash != request.hash || def.name != request.name {
                        return Ok(None);
                    }
                }
                // No version information in this object: accept the symbol.
            }
            None => {
                if self.versym_addr != 0 && self.verdefs.is_some() {
                    // Base definitions are guaranteed to be index 1 and 2.
                    let verndx = self.version_index(image, index)?;
                    if verndx != 1 && verndx != 2 {
                        // Not the base definition; accepted later only if it
                        // stays the sole match of the chain.
                        *last_match = Some(index);
                        return Ok(None);
                    }
                }
            }
        }

        if st_bind(sym.info(image)?) == STB_WEAK {
            *weak_match = Some(index);
            return Ok(None);
        }
        Ok(Some(index))
    }
}
