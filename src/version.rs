//! Views over the `GNU_verneed` and `GNU_verdef` tables of one object.
//!
//! Both tables are chained records inside the already-biased image; entries
//! reference version-name strings through the owning object's dynamic string
//! table. The walks are bounded so a malformed `next` chain cannot spin
//! forever.

use elf::abi::VER_FLG_WEAK;

use crate::Result;
use crate::image::TargetImage;

/// Upper bound on chained version records; real tables are tiny.
const MAX_VERSION_RECORDS: u32 = u16::MAX as u32;

/// A version definition or requirement: name string plus its ELF hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionTag {
    pub name: Vec<u8>,
    pub hash: u32,
}

/// The `GNU_verneed` table: per dependency file, the version tags this object
/// requires from it.
#[derive(Clone, Copy, Debug)]
pub struct VersionNeeded {
    addr: u32,
    strtab: u32,
}

impl VersionNeeded {
    pub fn new(addr: u32, strtab: u32) -> Self {
        VersionNeeded { addr, strtab }
    }

    /// Finds the version tag with `vna_other == index`, the linkage between
    /// an entry of the `versym` array and the requirement it names.
    pub fn lookup_version(&self, image: &TargetImage, index: u16) -> Result<Option<VersionTag>> {
        let mut entry = Some(self.addr);
        let mut guard = 0;
        while let Some(vn) = entry {
            let mut aux = match image.read(vn + 8, 4)? {
                0 => None,
                off => Some(vn.wrapping_add(off)),
            };
            while let Some(vna) = aux {
                guard += 1;
                if guard > MAX_VERSION_RECORDS {
                    return Ok(None);
                }
                if image.read(vna + 6, 2)? as u16 == index {
                    let name = image.read_cstr(self.strtab + image.read(vna + 8, 4)?)?;
                    return Ok(Some(VersionTag {
                        name: name.to_vec(),
                        hash: image.read(vna, 4)?,
                    }));
                }
                aux = match image.read(vna + 12, 4)? {
                    0 => None,
                    off => Some(vna.wrapping_add(off)),
                };
            }
            guard += 1;
            if guard > MAX_VERSION_RECORDS {
                return Ok(None);
            }
            entry = match image.read(vn + 12, 4)? {
                0 => None,
                off => Some(vn.wrapping_add(off)),
            };
        }
        Ok(None)
    }

    /// Checks this object's requirements against a dependency's definitions.
    ///
    /// Returns the name of the first required, non-weak version tag the
    /// dependency `file` fails to define, or `None` when every requirement is
    /// satisfied (including the case of no entry for `file` at all). A
    /// dependency carrying no version definitions whatsoever cannot satisfy
    /// any requirement, weak or not.
    pub fn unsatisfied(
        &self,
        image: &TargetImage,
        file: &[u8],
        defs: Option<&VersionDefinitions>,
    ) -> Result<Option<Vec<u8>>> {
        let mut entry = Some(self.addr);
        let mut guard = 0;
        while let Some(vn) = entry {
            guard += 1;
            if guard > MAX_VERSION_RECORDS {
                break;
            }
            let entry_file = image.read_cstr(self.strtab + image.read(vn + 4, 4)?)?;
            if entry_file == file {
                let Some(defs) = defs else {
                    // The dependency carries no version information at all;
                    // it cannot be the library this object was linked against.
                    return Ok(Some(file.to_vec()));
                };
                let mut aux = match image.read(vn + 8, 4)? {
                    0 => None,
                    off => Some(vn.wrapping_add(off)),
                };
                while let Some(vna) = aux {
                    guard += 1;
                    if guard > MAX_VERSION_RECORDS {
                        break;
                    }
                    let hash = image.read(vna, 4)?;
                    let flags = image.read(vna + 4, 2)? as u16;
                    let name = image.read_cstr(self.strtab + image.read(vna + 8, 4)?)?.to_vec();
                    if !defs.contains(image, &name, hash)? && flags & VER_FLG_WEAK == 0 {
                        return Ok(Some(name));
                    }
                    aux = match image.read(vna + 12, 4)? {
                        0 => None,
                        off => Some(vna.wrapping_add(off)),
                    };
                }
                return Ok(None);
            }
            entry = match image.read(vn + 12, 4)? {
                0 => None,
                off => Some(vn.wrapping_add(off)),
            };
        }
        Ok(None)
    }
}

/// The `GNU_verdef` table: the version tags this object defines.
#[derive(Clone, Copy, Debug)]
pub struct VersionDefinitions {
    addr: u32,
    strtab: u32,
}

impl VersionDefinitions {
    pub fn new(addr: u32, strtab: u32) -> Self {
        VersionDefinitions { addr, strtab }
    }

    /// Whether a definition with this exact name and hash exists.
    pub fn contains(&self, image: &TargetImage, name: &[u8], hash: u32) -> Result<bool> {
        let mut entry = Some(self.addr);
        let mut guard = 0;
        while let Some(vd) = entry {
            guard += 1;
            if guard > MAX_VERSION_RECORDS {
                break;
            }
            if image.read(vd + 8, 4)? == hash
                && self.entry_name(image, vd)?.as_deref() == Some(name)
            {
                return Ok(true);
            }
            entry = match image.read(vd + 16, 4)? {
                0 => None,
                off => Some(vd.wrapping_add(off)),
            };
        }
        Ok(false)
    }

    /// The definition whose `vd_ndx` equals `index`, the linkage between an
    /// entry of the `versym` array and the definition it names.
    pub fn by_index(&self, image: &TargetImage, index: u16) -> Result<Option<VersionTag>> {
        let mut entry = Some(self.addr);
        let mut guard = 0;
        while let Some(vd) = entry {
            guard += 1;
            if guard > MAX_VERSION_RECORDS {
                break;
            }
            if image.read(vd + 4, 2)? as u16 == index {
                let name = self.entry_name(image, vd)?.unwrap_or_default();
                return Ok(Some(VersionTag {
                    name,
                    hash: image.read(vd + 8, 4)?,
                }));
            }
            entry = match image.read(vd + 16, 4)? {
                0 => None,
                off => Some(vd.wrapping_add(off)),
            };
        }
        Ok(None)
    }

    /// Name of the definition's first aux record, if any.
    fn entry_name(&self, image: &TargetImage, vd: u32) -> Result<Option<Vec<u8>>> {
        let aux_off = image.read(vd + 12, 4)?;
        if aux_off == 0 {
            return Ok(None);
        }
        let vda = vd.wrapping_add(aux_off);
        let name_off = image.read(vda, 4)?;
        Ok(Some(image.read_cstr(self.strtab + name_off)?.to_vec()))
    }
}
