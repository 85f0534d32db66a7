//! Dynamic relocation records and the canonical relocation-kind table.
//!
//! The canonical numbering below is this simulator family's own; objects
//! produced by a foreign toolchain are adapted through
//! [`crate::RelocationMap`] before the codes reach [`RelocKind::from_code`].

use crate::Result;
use crate::image::TargetImage;

/// Whether the object uses implicit-addend (`Elf32_Rel`) or explicit-addend
/// (`Elf32_Rela`) records.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelFormat {
    Rel,
    Rela,
}

impl RelFormat {
    /// Record size in bytes.
    #[inline]
    pub fn entry_size(self) -> u32 {
        match self {
            RelFormat::Rel => 8,
            RelFormat::Rela => 12,
        }
    }
}

/// Non-owning view over one object's relocation records in the image.
#[derive(Clone, Copy, Debug)]
pub struct DynamicRelocations {
    addr: u32,
    count: u32,
    format: RelFormat,
}

impl DynamicRelocations {
    pub fn new(addr: u32, count: u32, format: RelFormat) -> Self {
        DynamicRelocations { addr, count, format }
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn format(&self) -> RelFormat {
        self.format
    }

    #[inline]
    fn entry_addr(&self, index: u32) -> u32 {
        self.addr + index * self.format.entry_size()
    }

    /// `r_offset` of record `index`.
    pub fn offset(&self, image: &TargetImage, index: u32) -> Result<u32> {
        image.read(self.entry_addr(index), 4)
    }

    /// `r_info` of record `index`.
    pub fn info(&self, image: &TargetImage, index: u32) -> Result<u32> {
        image.read(self.entry_addr(index) + 4, 4)
    }

    /// `r_addend` of record `index`; implicit-addend records yield 0.
    pub fn addend(&self, image: &TargetImage, index: u32) -> Result<i32> {
        match self.format {
            RelFormat::Rel => Ok(0),
            RelFormat::Rela => Ok(image.read(self.entry_addr(index) + 8, 4)? as i32),
        }
    }
}

/// `ELF32_R_SYM`
#[inline]
pub fn r_sym(info: u32) -> u32 {
    info >> 8
}

/// `ELF32_R_TYPE`
#[inline]
pub fn r_type(info: u32) -> u32 {
    info & 0xff
}

/// Canonical relocation code for copy relocations, needed by the symbol
/// adjustment phase to find copy targets in the executable.
pub const R_COPY: u32 = 2;

/// The relocation kinds of the canonical numbering.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelocKind {
    /// 0: no-op.
    None,
    /// 1: add the object's load bias to the word already stored at the
    /// target location. Overflow is not checked.
    Relative,
    /// 2: performed as a deferred byte copy scheduled during symbol
    /// adjustment, never applied in place.
    Copy,
    /// 3: store the resolved symbol value, full word width.
    JumpSlot,
    /// 4: store the resolved symbol value, full word width.
    GlobDat,
    /// 5-7: store the resolved symbol value truncated to the named width.
    Abs8,
    Abs16,
    Abs32,
    /// 8-10: store the distance from the target location to the resolved
    /// symbol value, truncated to the named width.
    Rel8,
    Rel16,
    Rel32,
}

impl RelocKind {
    /// Maps a canonical code to its kind; `None` for codes the engine does
    /// not implement.
    pub fn from_code(code: u32) -> Option<RelocKind> {
        Some(match code {
            0 => RelocKind::None,
            1 => RelocKind::Relative,
            R_COPY => RelocKind::Copy,
            3 => RelocKind::JumpSlot,
            4 => RelocKind::GlobDat,
            5 => RelocKind::Abs8,
            6 => RelocKind::Abs16,
            7 => RelocKind::Abs32,
            8 => RelocKind::Rel8,
            9 => RelocKind::Rel16,
            10 => RelocKind::Rel32,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Endian;

    #[test]
    fn reads_rel_and_rela_records() {
        let mut mem = vec![0u8; 0x60];
        {
            let mut image = TargetImage::new(&mut mem, Endian::Msb);
            // One Elf32_Rela record at 0x10: offset, info, addend.
            image.write(0x10, 4, 0x40).unwrap();
            image.write(0x14, 4, (3 << 8) | 4).unwrap();
            image.write(0x18, 4, (-8i32) as u32).unwrap();
            // One Elf32_Rel record at 0x30.
            image.write(0x30, 4, 0x44).unwrap();
            image.write(0x34, 4, (7 << 8) | 1).unwrap();
        }
        let image = TargetImage::new(&mut mem, Endian::Msb);
        let rela = DynamicRelocations::new(0x10, 1, RelFormat::Rela);
        assert_eq!(rela.offset(&image, 0).unwrap(), 0x40);
        assert_eq!(r_sym(rela.info(&image, 0).unwrap()), 3);
        assert_eq!(r_type(rela.info(&image, 0).unwrap()), 4);
        assert_eq!(rela.addend(&image, 0).unwrap(), -8);
        let rel = DynamicRelocations::new(0x30, 1, RelFormat::Rel);
        assert_eq!(rel.offset(&image, 0).unwrap(), 0x44);
        assert_eq!(r_sym(rel.info(&image, 0).unwrap()), 7);
        assert_eq!(rel.addend(&image, 0).unwrap(), 0);
    }

    #[test]
    fn kind_table_covers_the_canonical_codes() {
        assert_eq!(RelocKind::from_code(0), Some(RelocKind::None));
        assert_eq!(RelocKind::from_code(1), Some(RelocKind::Relative));
        assert_eq!(RelocKind::from_code(2), Some(RelocKind::Copy));
        assert_eq!(RelocKind::from_code(10), Some(RelocKind::Rel32));
        assert_eq!(RelocKind::from_code(11), None);
        assert_eq!(RelocKind::from_code(12), None);
    }
}
