//! Endian-correct access to `Elf32_Sym` records living in the target image.
//!
//! The relocation engine both reads and rewrites symbol records in place
//! (adjusting values by the load bias, copying resolved definitions over
//! undefined entries), so the accessor works on image addresses rather than
//! borrowed structs.

use elf::abi::{STT_COMMON, STT_FUNC};

use crate::Result;
use crate::image::TargetImage;

/// Size of one `Elf32_Sym` record.
pub const SYM_ENTRY_SIZE: u32 = 16;

/// A view of one symbol record at `symtab_addr + index * 16`.
#[derive(Clone, Copy, Debug)]
pub struct SymbolView {
    addr: u32,
}

impl SymbolView {
    #[inline]
    pub fn at(symtab_addr: u32, index: u32) -> Self {
        SymbolView {
            addr: symtab_addr.wrapping_add(index.wrapping_mul(SYM_ENTRY_SIZE)),
        }
    }

    pub fn name_index(&self, image: &TargetImage) -> Result<u32> {
        image.read(self.addr, 4)
    }

    pub fn value(&self, image: &TargetImage) -> Result<u32> {
        image.read(self.addr + 4, 4)
    }

    pub fn set_value(&self, image: &mut TargetImage, value: u32) -> Result<()> {
        image.write(self.addr + 4, 4, value)
    }

    pub fn size(&self, image: &TargetImage) -> Result<u32> {
        image.read(self.addr + 8, 4)
    }

    pub fn set_size(&self, image: &mut TargetImage, size: u32) -> Result<()> {
        image.write(self.addr + 8, 4, size)
    }

    pub fn info(&self, image: &TargetImage) -> Result<u8> {
        Ok(image.read(self.addr + 12, 1)? as u8)
    }

    pub fn set_info(&self, image: &mut TargetImage, info: u8) -> Result<()> {
        image.write(self.addr + 12, 1, u32::from(info))
    }

    pub fn other(&self, image: &TargetImage) -> Result<u8> {
        Ok(image.read(self.addr + 13, 1)? as u8)
    }

    pub fn shndx(&self, image: &TargetImage) -> Result<u16> {
        Ok(image.read(self.addr + 14, 2)? as u16)
    }

    pub fn set_shndx(&self, image: &mut TargetImage, shndx: u16) -> Result<()> {
        image.write(self.addr + 14, 2, u32::from(shndx))
    }
}

/// `ELF32_ST_BIND`
#[inline]
pub fn st_bind(info: u8) -> u8 {
    info >> 4
}

/// `ELF32_ST_TYPE`
#[inline]
pub fn st_type(info: u8) -> u8 {
    info & 0xf
}

/// `ELF32_ST_VISIBILITY`
#[inline]
pub fn st_visibility(other: u8) -> u8 {
    other & 0x3
}

/// The symbol types the linker adjusts and resolves: data, code, common and
/// untyped entries. Everything else (sections, files, TLS) is skipped.
#[inline]
pub fn is_linkable_type(sym_type: u8) -> bool {
    sym_type <= STT_FUNC || sym_type == STT_COMMON
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Endian;
    use elf::abi::{STB_GLOBAL, STT_OBJECT};

    #[test]
    fn round_trips_fields_in_both_endians() {
        for endian in [Endian::Lsb, Endian::Msb] {
            let mut mem = vec![0u8; 0x40];
            let mut image = TargetImage::new(&mut mem, endian);
            let sym = SymbolView::at(0x10, 1);
            sym.set_value(&mut image, 0xcafe_f00d).unwrap();
            sym.set_size(&mut image, 24).unwrap();
            sym.set_info(&mut image, (STB_GLOBAL << 4) | STT_OBJECT).unwrap();
            sym.set_shndx(&mut image, 7).unwrap();
            assert_eq!(sym.value(&image).unwrap(), 0xcafe_f00d);
            assert_eq!(sym.size(&image).unwrap(), 24);
            assert_eq!(st_bind(sym.info(&image).unwrap()), STB_GLOBAL);
            assert_eq!(st_type(sym.info(&image).unwrap()), STT_OBJECT);
            assert_eq!(sym.shndx(&image).unwrap(), 7);
            // The record starts 16 bytes past the table base.
            assert_eq!(image.read(0x10 + 16 + 4, 4).unwrap(), 0xcafe_f00d);
        }
    }

    #[test]
    fn linkable_type_filter() {
        use elf::abi::{STT_FILE, STT_NOTYPE, STT_SECTION, STT_TLS};
        assert!(is_linkable_type(STT_NOTYPE));
        assert!(is_linkable_type(STT_OBJECT));
        assert!(is_linkable_type(STT_FUNC));
        assert!(is_linkable_type(STT_COMMON));
        assert!(!is_linkable_type(STT_SECTION));
        assert!(!is_linkable_type(STT_FILE));
        assert!(!is_linkable_type(STT_TLS));
    }
}
