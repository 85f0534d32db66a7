//! Parsing of one object's `PT_DYNAMIC` segment.

use elf::abi::{DT_NEEDED, DT_NULL};

use crate::image::TargetImage;
use crate::{Result, parse_dynamic_error};

/// One `(tag, value)` pair of the dynamic array.
#[derive(Clone, Copy, Debug)]
pub struct DynEntry {
    pub tag: i64,
    pub value: u32,
}

/// An owned snapshot of an object's dynamic array, endian-corrected once at
/// load time.
///
/// Values read before the object's load bias is known (the string-table
/// address in particular) must be re-biased with [`DynamicInfo::set_value`]
/// before they are reused for dependency-name lookup.
#[derive(Debug)]
pub struct DynamicInfo {
    entries: Vec<DynEntry>,
}

impl DynamicInfo {
    /// Copies the tag/value array at `addr` out of the image, up to the
    /// `DT_NULL` terminator.
    pub fn load(image: &TargetImage, addr: u32) -> Result<DynamicInfo> {
        let mut entries = Vec::new();
        let mut cursor = addr;
        let truncated =
            || parse_dynamic_error(format!("dynamic segment at {addr:#x} is truncated"));
        loop {
            let tag = image.read(cursor, 4).map_err(|_| truncated())? as i32;
            let value = image.read(cursor + 4, 4).map_err(|_| truncated())?;
            if i64::from(tag) == DT_NULL {
                break;
            }
            entries.push(DynEntry {
                tag: i64::from(tag),
                value,
            });
            cursor += 8;
        }
        Ok(DynamicInfo { entries })
    }

    /// The value of the first entry carrying `tag`. The binaries this loader
    /// accepts do not repeat a tag (`DT_NEEDED` aside), so the first match is
    /// the only one.
    pub fn value(&self, tag: i64) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.tag == tag)
            .map(|entry| entry.value)
    }

    /// Like [`DynamicInfo::value`], with 0 standing in for an absent tag.
    /// The dynamic tags this loader consumes never carry a meaningful zero.
    pub fn value_or_zero(&self, tag: i64) -> u32 {
        self.value(tag).unwrap_or(0)
    }

    /// Overwrites the first entry carrying `tag`. Returns false when the tag
    /// is not present.
    pub fn set_value(&mut self, tag: i64, value: u32) -> bool {
        match self.entries.iter_mut().find(|entry| entry.tag == tag) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }

    /// String-table offsets of the `DT_NEEDED` entries, in file order.
    pub fn needed(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.tag == DT_NEEDED)
            .map(|entry| entry.value)
    }
}
