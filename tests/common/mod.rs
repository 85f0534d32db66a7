#![allow(dead_code)]

//! Byte-level ELF32 fixture builder for the linking tests.
//!
//! Builds minimal but well-formed shared objects without any cross toolchain:
//! one PT_LOAD covering the whole file (vaddr == file offset, so a bias of 0
//! leaves every address equal to its file offset) and one PT_DYNAMIC. The data
//! region starts at [`DATA_ADDR`]; tests pick symbol values and relocation
//! targets inside it, so every interesting address is known up front.

use std::path::PathBuf;

use elf_rtld::Endian;
use elf_rtld::symtab::elf_hash;

pub const DATA_ADDR: u32 = 0x80;

pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

const DT_NEEDED: u32 = 1;
const DT_HASH: u32 = 4;
const DT_STRTAB: u32 = 5;
const DT_SYMTAB: u32 = 6;
const DT_RELA: u32 = 7;
const DT_INIT: u32 = 12;
const DT_FINI: u32 = 13;
const DT_REL: u32 = 17;
const DT_PLTREL: u32 = 20;
const DT_VERSYM: u32 = 0x6fff_fff0;
const DT_VERDEF: u32 = 0x6fff_fffc;
const DT_VERNEED: u32 = 0x6fff_fffe;

const VER_FLG_WEAK: u16 = 0x2;

pub struct Sym {
    name: String,
    value: u32,
    size: u32,
    info: u8,
    shndx: u16,
    versym: u16,
}

impl Sym {
    pub fn obj(name: &str, value: u32, size: u32) -> Sym {
        Sym {
            name: name.to_owned(),
            value,
            size,
            info: (STB_GLOBAL << 4) | STT_OBJECT,
            shndx: 1,
            versym: 1,
        }
    }

    pub fn func(name: &str, value: u32) -> Sym {
        Sym {
            name: name.to_owned(),
            value,
            size: 0,
            info: (STB_GLOBAL << 4) | STT_FUNC,
            shndx: 1,
            versym: 1,
        }
    }

    pub fn undef(name: &str) -> Sym {
        Sym {
            name: name.to_owned(),
            value: 0,
            size: 0,
            info: (STB_GLOBAL << 4) | STT_OBJECT,
            shndx: 0,
            versym: 0,
        }
    }

    pub fn weak(mut self) -> Sym {
        self.info = (STB_WEAK << 4) | (self.info & 0xf);
        self
    }

    /// Sets the symbol's `versym` entry (definition index for defined
    /// symbols, requirement index for undefined ones).
    pub fn versym(mut self, index: u16) -> Sym {
        self.versym = index;
        self
    }
}

pub struct Rel {
    offset: u32,
    sym: String,
    rtype: u32,
    addend: i32,
}

/// One version tag required from a dependency file.
pub struct Need {
    pub version: String,
    pub index: u16,
    pub weak: bool,
}

impl Need {
    pub fn strong(version: &str, index: u16) -> Need {
        Need {
            version: version.to_owned(),
            index,
            weak: false,
        }
    }

    pub fn weak(version: &str, index: u16) -> Need {
        Need {
            version: version.to_owned(),
            index,
            weak: true,
        }
    }
}

pub struct ObjBuilder {
    endian: Endian,
    entry: u32,
    data: Vec<u8>,
    bss: u32,
    syms: Vec<Sym>,
    needed: Vec<String>,
    relocs: Vec<Rel>,
    rela: bool,
    verdefs: Vec<(String, u16)>,
    verneed: Vec<(String, Vec<Need>)>,
    init: Option<u32>,
    fini: Option<u32>,
}

pub struct Fixture {
    pub bytes: Vec<u8>,
    pub dyn_addr: u32,
    /// Unbiased address of the dynamic symbol table (16-byte records, index 0
    /// is the null symbol).
    pub symtab_addr: u32,
    /// Total memory extent (file image plus bss).
    pub mem_size: u32,
}

impl ObjBuilder {
    pub fn new(endian: Endian) -> ObjBuilder {
        ObjBuilder {
            endian,
            entry: 0,
            data: Vec::new(),
            bss: 0,
            syms: Vec::new(),
            needed: Vec::new(),
            relocs: Vec::new(),
            rela: true,
            verdefs: Vec::new(),
            verneed: Vec::new(),
            init: None,
            fini: None,
        }
    }

    /// Raw bytes placed at [`DATA_ADDR`].
    pub fn data(mut self, bytes: &[u8]) -> Self {
        self.data = bytes.to_vec();
        self
    }

    pub fn bss(mut self, size: u32) -> Self {
        self.bss = size;
        self
    }

    pub fn entry(mut self, entry: u32) -> Self {
        self.entry = entry;
        self
    }

    pub fn sym(mut self, sym: Sym) -> Self {
        self.syms.push(sym);
        self
    }

    pub fn needed(mut self, name: &str) -> Self {
        self.needed.push(name.to_owned());
        self
    }

    /// Switches the relocation records to the implicit-addend `Elf32_Rel`
    /// format.
    pub fn rel_format(mut self) -> Self {
        self.rela = false;
        self
    }

    /// Adds a relocation; `sym` is a symbol name previously added with
    /// [`ObjBuilder::sym`], or `""` for none.
    pub fn reloc(mut self, offset: u32, rtype: u32, sym: &str, addend: i32) -> Self {
        self.relocs.push(Rel {
            offset,
            sym: sym.to_owned(),
            rtype,
            addend,
        });
        self
    }

    pub fn verdef(mut self, name: &str, index: u16) -> Self {
        self.verdefs.push((name.to_owned(), index));
        self
    }

    /// Declares the version tags this object requires from dependency `file`.
    pub fn verneed(mut self, file: &str, needs: Vec<Need>) -> Self {
        self.verneed.push((file.to_owned(), needs));
        self
    }

    pub fn init(mut self, addr: u32) -> Self {
        self.init = Some(addr);
        self
    }

    pub fn fini(mut self, addr: u32) -> Self {
        self.fini = Some(addr);
        self
    }

    pub fn build(self) -> Fixture {
        let e = self.endian;

        // Dynamic string table, interned up front (position independent).
        let mut strtab = vec![0u8];
        let mut intern = |s: &str| -> u32 {
            let off = strtab.len() as u32;
            strtab.extend_from_slice(s.as_bytes());
            strtab.push(0);
            off
        };
        let sym_names: Vec<u32> = self.syms.iter().map(|s| intern(&s.name)).collect();
        let needed_offs: Vec<u32> = self.needed.iter().map(|n| intern(n)).collect();
        let verdef_names: Vec<u32> = self.verdefs.iter().map(|(n, _)| intern(n)).collect();
        let verneed_offs: Vec<(u32, Vec<u32>)> = self
            .verneed
            .iter()
            .map(|(file, needs)| {
                let file_off = intern(file);
                let aux_offs = needs.iter().map(|need| intern(&need.version)).collect();
                (file_off, aux_offs)
            })
            .collect();

        // Symbol table: null record first, then the declared symbols.
        let nsyms = self.syms.len() as u32 + 1;
        let mut symtab = vec![0u8; 16];
        for (i, sym) in self.syms.iter().enumerate() {
            put(&mut symtab, 4, sym_names[i], e);
            put(&mut symtab, 4, sym.value, e);
            put(&mut symtab, 4, sym.size, e);
            symtab.push(sym.info);
            symtab.push(0);
            put(&mut symtab, 2, u32::from(sym.shndx), e);
        }

        // SYSV hash table, three buckets, chains built LIFO so the symbol
        // added last is found first.
        let nbuckets = 3u32;
        let mut buckets = vec![0u32; nbuckets as usize];
        let mut chain = vec![0u32; nsyms as usize];
        for (i, sym) in self.syms.iter().enumerate() {
            let index = i as u32 + 1;
            let slot = (elf_hash(sym.name.as_bytes()) % nbuckets) as usize;
            chain[index as usize] = buckets[slot];
            buckets[slot] = index;
        }
        let mut hash = Vec::new();
        put(&mut hash, 4, nbuckets, e);
        put(&mut hash, 4, nsyms, e);
        for bucket in &buckets {
            put(&mut hash, 4, *bucket, e);
        }
        for link in &chain {
            put(&mut hash, 4, *link, e);
        }

        let has_versions = !self.verdefs.is_empty() || !self.verneed.is_empty();
        let mut versym = Vec::new();
        if has_versions {
            put(&mut versym, 2, 0, e);
            for sym in &self.syms {
                put(&mut versym, 2, u32::from(sym.versym), e);
            }
        }

        let mut verneed = Vec::new();
        for (i, (_, needs)) in self.verneed.iter().enumerate() {
            let last_entry = i + 1 == self.verneed.len();
            put(&mut verneed, 2, 1, e); // vn_version
            put(&mut verneed, 2, needs.len() as u32, e);
            put(&mut verneed, 4, verneed_offs[i].0, e);
            put(&mut verneed, 4, 16, e); // vn_aux
            let next = if last_entry { 0 } else { 16 + 16 * needs.len() as u32 };
            put(&mut verneed, 4, next, e);
            for (j, need) in needs.iter().enumerate() {
                put(&mut verneed, 4, elf_hash(need.version.as_bytes()), e);
                let flags = if need.weak { VER_FLG_WEAK } else { 0 };
                put(&mut verneed, 2, u32::from(flags), e);
                put(&mut verneed, 2, u32::from(need.index), e);
                put(&mut verneed, 4, verneed_offs[i].1[j], e);
                let next = if j + 1 == needs.len() { 0 } else { 16 };
                put(&mut verneed, 4, next, e);
            }
        }

        let mut verdef = Vec::new();
        for (i, (name, index)) in self.verdefs.iter().enumerate() {
            let last_entry = i + 1 == self.verdefs.len();
            put(&mut verdef, 2, 1, e); // vd_version
            put(&mut verdef, 2, 0, e); // vd_flags
            put(&mut verdef, 2, u32::from(*index), e);
            put(&mut verdef, 2, 1, e); // vd_cnt
            put(&mut verdef, 4, elf_hash(name.as_bytes()), e);
            put(&mut verdef, 4, 20, e); // vd_aux
            put(&mut verdef, 4, if last_entry { 0 } else { 28 }, e);
            put(&mut verdef, 4, verdef_names[i], e); // vda_name
            put(&mut verdef, 4, 0, e); // vda_next
        }

        let mut reltab = Vec::new();
        for rel in &self.relocs {
            let sym_index = if rel.sym.is_empty() {
                0
            } else {
                self.syms
                    .iter()
                    .position(|s| s.name == rel.sym)
                    .map(|p| p as u32 + 1)
                    .unwrap_or_else(|| panic!("relocation names unknown symbol {}", rel.sym))
            };
            put(&mut reltab, 4, rel.offset, e);
            put(&mut reltab, 4, (sym_index << 8) | rel.rtype, e);
            if self.rela {
                put(&mut reltab, 4, rel.addend as u32, e);
            }
        }

        // Section placement past the data region, 4-aligned.
        let mut off = align4(DATA_ADDR + self.data.len() as u32);
        let mut place = |len: usize| -> u32 {
            let at = off;
            off = align4(off + len as u32);
            at
        };
        let strtab_addr = place(strtab.len());
        let symtab_addr = place(symtab.len());
        let hash_addr = place(hash.len());
        let versym_addr = place(versym.len());
        let verneed_addr = place(verneed.len());
        let verdef_addr = place(verdef.len());
        let rel_addr = place(reltab.len());
        let dyn_addr = off;

        let mut dynamic = Vec::new();
        let mut tag = |t: u32, v: u32| {
            put(&mut dynamic, 4, t, e);
            put(&mut dynamic, 4, v, e);
        };
        for needed_off in &needed_offs {
            tag(DT_NEEDED, *needed_off);
        }
        tag(DT_HASH, hash_addr);
        tag(DT_STRTAB, strtab_addr);
        tag(DT_SYMTAB, symtab_addr);
        if !reltab.is_empty() {
            let pltrel = if self.rela { DT_RELA } else { DT_REL };
            tag(DT_PLTREL, pltrel);
            tag(pltrel, rel_addr);
            tag(pltrel + 1, reltab.len() as u32); // DT_REL(A)SZ
        }
        if !versym.is_empty() {
            tag(DT_VERSYM, versym_addr);
        }
        if !verneed.is_empty() {
            tag(DT_VERNEED, verneed_addr);
        }
        if !verdef.is_empty() {
            tag(DT_VERDEF, verdef_addr);
        }
        if let Some(init) = self.init {
            tag(DT_INIT, init);
        }
        if let Some(fini) = self.fini {
            tag(DT_FINI, fini);
        }
        tag(0, 0); // DT_NULL

        let file_len = dyn_addr + dynamic.len() as u32;
        let mut bytes = vec![0u8; file_len as usize];

        // ELF header.
        bytes[0] = 0x7f;
        bytes[1..4].copy_from_slice(b"ELF");
        bytes[4] = 1; // ELFCLASS32
        bytes[5] = match e {
            Endian::Lsb => 1,
            Endian::Msb => 2,
        };
        bytes[6] = 1; // EV_CURRENT
        put_at(&mut bytes, 16, 2, 3, e); // ET_DYN
        put_at(&mut bytes, 20, 4, 1, e); // e_version
        put_at(&mut bytes, 24, 4, self.entry, e);
        put_at(&mut bytes, 28, 4, 52, e); // e_phoff
        put_at(&mut bytes, 40, 2, 52, e); // e_ehsize
        put_at(&mut bytes, 42, 2, 32, e); // e_phentsize
        put_at(&mut bytes, 44, 2, 2, e); // e_phnum

        // PT_LOAD covering the whole file, then PT_DYNAMIC.
        write_phdr(&mut bytes, 52, 1, 0, file_len, file_len + self.bss, e);
        write_phdr(&mut bytes, 84, 2, dyn_addr, dynamic.len() as u32, dynamic.len() as u32, e);

        copy_at(&mut bytes, DATA_ADDR, &self.data);
        copy_at(&mut bytes, strtab_addr, &strtab);
        copy_at(&mut bytes, symtab_addr, &symtab);
        copy_at(&mut bytes, hash_addr, &hash);
        copy_at(&mut bytes, versym_addr, &versym);
        copy_at(&mut bytes, verneed_addr, &verneed);
        copy_at(&mut bytes, verdef_addr, &verdef);
        copy_at(&mut bytes, rel_addr, &reltab);
        copy_at(&mut bytes, dyn_addr, &dynamic);

        Fixture {
            bytes,
            dyn_addr,
            symtab_addr,
            mem_size: file_len + self.bss,
        }
    }
}

fn align4(x: u32) -> u32 {
    (x + 3) & !3
}

fn put(buf: &mut Vec<u8>, width: usize, value: u32, endian: Endian) {
    let le = value.to_le_bytes();
    match endian {
        Endian::Lsb => buf.extend_from_slice(&le[..width]),
        Endian::Msb => buf.extend(le[..width].iter().rev()),
    }
}

fn put_at(buf: &mut [u8], at: usize, width: usize, value: u32, endian: Endian) {
    let le = value.to_le_bytes();
    match endian {
        Endian::Lsb => {
            for (i, byte) in le[..width].iter().enumerate() {
                buf[at + i] = *byte;
            }
        }
        Endian::Msb => {
            for (i, byte) in le[..width].iter().rev().enumerate() {
                buf[at + i] = *byte;
            }
        }
    }
}

fn copy_at(buf: &mut [u8], at: u32, src: &[u8]) {
    buf[at as usize..at as usize + src.len()].copy_from_slice(src);
}

#[allow(clippy::too_many_arguments)]
fn write_phdr(
    bytes: &mut [u8],
    at: usize,
    p_type: u32,
    offset: u32,
    filesz: u32,
    memsz: u32,
    e: Endian,
) {
    put_at(bytes, at, 4, p_type, e);
    put_at(bytes, at + 4, 4, offset, e);
    put_at(bytes, at + 8, 4, offset, e); // vaddr == file offset
    put_at(bytes, at + 12, 4, offset, e);
    put_at(bytes, at + 16, 4, filesz, e);
    put_at(bytes, at + 20, 4, memsz, e);
    put_at(bytes, at + 24, 4, 7, e); // rwx
    put_at(bytes, at + 28, 4, 4, e);
}

/// Writes a fixture library into a per-process scratch directory and returns
/// its absolute path, suitable as a `DT_NEEDED` string.
pub fn write_library(tag: &str, fixture: &Fixture) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("elf_rtld_tests_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(tag);
    std::fs::write(&path, &fixture.bytes).unwrap();
    path
}

/// Copies the executable fixture to address 0 of the target memory, the way
/// the simulator itself places the primary executable.
pub fn install_root(mem: &mut [u8], fixture: &Fixture) {
    mem[..fixture.bytes.len()].copy_from_slice(&fixture.bytes);
}
