//! Optional translation of target-emitted relocation codes.
//!
//! A simulator target's toolchain is free to number its relocations however it
//! likes; the relocation engine only understands the canonical codes of
//! [`crate::reloc::RelocKind`]. A `ac_rtld.relmap` file found on the library
//! search path maps emitted numbers to canonical ones. Absence of the file is
//! the normal, silent mode: codes are used unmodified.

use hashbrown::HashMap;

use crate::object;

/// Fixed name of the relocation map file, searched for in the current
/// directory and along the library search path.
pub const RELMAP_FILENAME: &str = "ac_rtld.relmap";

/// An explicitly constructed relocation-code translation table.
///
/// Modelled as a value rather than process-wide state so the loader can run
/// against multiple targets sequentially in the same process.
#[derive(Debug, Default)]
pub struct RelocationMap {
    map: Option<HashMap<u32, u32>>,
}

impl RelocationMap {
    /// The identity mapping: every code translates to itself.
    pub fn empty() -> Self {
        RelocationMap { map: None }
    }

    /// Looks for [`RELMAP_FILENAME`] along the search path and parses it.
    ///
    /// A parse failure at any line discards the whole map (the table is never
    /// merged partially) and is reported with a single warning; loading then
    /// proceeds with the identity mapping.
    pub fn from_search_path() -> Self {
        let Some(path) = object::locate_file(RELMAP_FILENAME) else {
            return RelocationMap::empty();
        };
        let Ok(text) = std::fs::read_to_string(&path) else {
            log::warn!("could not read relocation map {}", path.display());
            return RelocationMap::empty();
        };
        match Self::from_text(&text) {
            Ok(map) => {
                log::debug!(
                    "loaded relocation map {} ({} entries)",
                    path.display(),
                    map.map.as_ref().map_or(0, HashMap::len)
                );
                map
            }
            Err(line) => {
                log::warn!(
                    "relocation map {} is malformed at line {line}; ignoring the whole file",
                    path.display()
                );
                RelocationMap::empty()
            }
        }
    }

    /// Parses the line-oriented `<uint> = <uint>` format. Lines starting with
    /// `#` are comments and blank lines are ignored. On failure returns the
    /// offending 1-based line number.
    pub fn from_text(text: &str) -> Result<Self, usize> {
        let mut map = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            if line.starts_with('#') {
                continue;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (lhs, rhs) = line.split_once('=').ok_or(idx + 1)?;
            let emitted: u32 = lhs.trim().parse().map_err(|_| idx + 1)?;
            let canonical: u32 = rhs.trim().parse().map_err(|_| idx + 1)?;
            map.insert(emitted, canonical);
        }
        Ok(RelocationMap { map: Some(map) })
    }

    /// Returns the canonical code for `code`, or `None` when the map carries
    /// no entry (the caller then uses `code` unmodified).
    #[inline]
    pub fn translate(&self, code: u32) -> Option<u32> {
        self.map.as_ref()?.get(&code).copied()
    }

    /// Whether a map file was found and parsed.
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.map.is_some()
    }
}
