//! Endian-aware access to the simulated target memory image.
//!
//! Every component that touches target memory goes through [`TargetImage`]; it
//! is the only place where multi-byte target data is interpreted, so host and
//! target byte order can never be silently confused.

use elf::abi::{ELFDATA2LSB, ELFDATA2MSB};

use crate::{Result, image_error};

/// Declared byte order of the target image, from `e_ident[EI_DATA]`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Endian {
    /// `ELFDATA2LSB`
    Lsb,
    /// `ELFDATA2MSB`
    Msb,
}

impl Endian {
    /// Maps an `EI_DATA` byte to an endianness, rejecting `ELFDATANONE`.
    pub fn from_ei_data(data: u8) -> Option<Endian> {
        match data {
            ELFDATA2LSB => Some(Endian::Lsb),
            ELFDATA2MSB => Some(Endian::Msb),
            _ => None,
        }
    }
}

/// Reads an unsigned little- or big-endian integer of `width` bytes (1, 2 or 4)
/// out of `bytes` at `offset`. Returns `None` past the end of the slice.
pub(crate) fn read_uint(bytes: &[u8], offset: usize, width: usize, endian: Endian) -> Option<u32> {
    debug_assert!(matches!(width, 1 | 2 | 4));
    let field = bytes.get(offset..offset.checked_add(width)?)?;
    let mut value = 0u32;
    match endian {
        Endian::Lsb => {
            for byte in field.iter().rev() {
                value = (value << 8) | u32::from(*byte);
            }
        }
        Endian::Msb => {
            for byte in field {
                value = (value << 8) | u32::from(*byte);
            }
        }
    }
    Some(value)
}

/// Writes the low `width` bytes of `value` into `bytes` at `offset`.
pub(crate) fn write_uint(
    bytes: &mut [u8],
    offset: usize,
    width: usize,
    value: u32,
    endian: Endian,
) -> Option<()> {
    debug_assert!(matches!(width, 1 | 2 | 4));
    let field = bytes.get_mut(offset..offset.checked_add(width)?)?;
    let mut value = value;
    match endian {
        Endian::Lsb => {
            for byte in field {
                *byte = value as u8;
                value >>= 8;
            }
        }
        Endian::Msb => {
            for byte in field.iter_mut().rev() {
                *byte = value as u8;
                value >>= 8;
            }
        }
    }
    Some(())
}

/// The simulated target memory, exclusively borrowed for the duration of the
/// load, plus the image's declared byte order.
pub struct TargetImage<'mem> {
    mem: &'mem mut [u8],
    endian: Endian,
}

impl<'mem> TargetImage<'mem> {
    pub fn new(mem: &'mem mut [u8], endian: Endian) -> Self {
        TargetImage { mem, endian }
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Total size of the target memory in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Reads a `width`-byte field (1, 2 or 4) at `addr` in target byte order.
    #[inline]
    pub fn read(&self, addr: u32, width: usize) -> Result<u32> {
        read_uint(self.mem, addr as usize, width, self.endian)
            .ok_or_else(|| out_of_bounds(addr, width))
    }

    /// Writes the low `width` bytes of `value` at `addr` in target byte order.
    #[inline]
    pub fn write(&mut self, addr: u32, width: usize, value: u32) -> Result<()> {
        write_uint(self.mem, addr as usize, width, value, self.endian)
            .ok_or_else(|| out_of_bounds(addr, width))
    }

    /// Returns the NUL-terminated byte string starting at `addr`, without the
    /// terminator. Errors if the string runs off the end of the image.
    pub fn read_cstr(&self, addr: u32) -> Result<&[u8]> {
        let start = addr as usize;
        let tail = self
            .mem
            .get(start..)
            .ok_or_else(|| out_of_bounds(addr, 1))?;
        let len = tail
            .iter()
            .position(|byte| *byte == 0)
            .ok_or_else(|| image_error(format!("unterminated string at {addr:#x}")))?;
        Ok(&tail[..len])
    }

    /// Mutable view of `len` raw bytes at `addr`, for bulk segment loading.
    pub fn bytes_mut(&mut self, addr: u32, len: usize) -> Result<&mut [u8]> {
        let start = addr as usize;
        self.mem
            .get_mut(start..start.checked_add(len).ok_or_else(|| out_of_bounds(addr, len))?)
            .ok_or_else(|| out_of_bounds(addr, len))
    }

    /// Copies `len` bytes inside the image, used to flush deferred copy
    /// relocations. Ranges may not overlap in practice (the destination lives
    /// in the executable, the source in a dependency); `copy_within` is safe
    /// either way.
    pub fn copy_within(&mut self, src: u32, dst: u32, len: u32) -> Result<()> {
        let src = src as usize;
        let dst = dst as usize;
        let len = len as usize;
        if src.checked_add(len).is_none_or(|end| end > self.mem.len())
            || dst.checked_add(len).is_none_or(|end| end > self.mem.len())
        {
            return Err(image_error(format!(
                "copy of {len} bytes from {src:#x} to {dst:#x} exceeds target memory"
            )));
        }
        self.mem.copy_within(src..src + len, dst);
        Ok(())
    }
}

#[cold]
fn out_of_bounds(addr: u32, width: usize) -> crate::Error {
    image_error(format!(
        "{width}-byte access at {addr:#x} exceeds target memory"
    ))
}
