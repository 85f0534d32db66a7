//! Locating shared-library files and reading their segments into the image.

use std::path::{Path, PathBuf};

use elf::abi::{
    ELFCLASS32, ELFMAG0, ELFMAG1, ELFMAG2, ELFMAG3, ET_DYN, PT_DYNAMIC, PT_INTERP, PT_LOAD,
};

use crate::image::{Endian, TargetImage, read_uint};
use crate::{Result, image_error, io_error, parse_ehdr_error};

/// Colon-separated list of directories searched for shared libraries and for
/// the relocation map file.
pub const ENV_LIBRARY_PATH: &str = "AC_LIBRARY_PATH";

/// Where an ingested object's `PT_DYNAMIC` segment ended up, and how much of
/// the address space it spans.
#[derive(Debug, Clone, Copy)]
pub struct LoadedObject {
    /// Bytes from the load bias to the end of the highest segment.
    pub total_size: u32,
    /// Absolute address of the DYNAMIC segment; 0 when the object has none.
    pub dyn_addr: u32,
    /// Size of the DYNAMIC segment in bytes.
    pub dyn_size: u32,
    /// Biased entry point.
    pub entry: u32,
}

/// Looks for `name` as given, then under each search-path directory.
pub fn locate_file(name: &str) -> Option<PathBuf> {
    let literal = PathBuf::from(name);
    if literal.is_file() {
        return Some(literal);
    }
    let search_path = std::env::var(ENV_LIBRARY_PATH).ok()?;
    search_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| candidate.is_file())
}

/// Reads the shared object at `path` and copies its loadable segments into
/// the image, each at its link-time address plus `bias`. Returns the object's
/// extent and the location of its DYNAMIC segment.
pub fn load_object(
    path: &Path,
    soname: &str,
    image: &mut TargetImage,
    bias: u32,
) -> Result<LoadedObject> {
    let file = std::fs::read(path)
        .map_err(|err| io_error(format!("reading \"{soname}\": {err}")))?;
    let endian = image.endian();

    if file.len() < 52
        || file[0] != ELFMAG0
        || file[1] != ELFMAG1
        || file[2] != ELFMAG2
        || file[3] != ELFMAG3
    {
        return Err(parse_ehdr_error(format!("\"{soname}\" is not an ELF file")));
    }
    if file[4] != ELFCLASS32 {
        return Err(parse_ehdr_error(format!(
            "\"{soname}\" is not a 32-bit ELF file"
        )));
    }
    if Endian::from_ei_data(file[5]) != Some(endian) {
        return Err(parse_ehdr_error(format!(
            "\"{soname}\" declares a byte order different from the target image"
        )));
    }

    let field = |offset: usize, width: usize| {
        read_uint(&file, offset, width, endian)
            .ok_or_else(|| parse_ehdr_error(format!("\"{soname}\" has a truncated ELF header")))
    };
    if field(16, 2)? as u16 != ET_DYN {
        return Err(parse_ehdr_error(format!(
            "\"{soname}\" is not an ELF dynamic library"
        )));
    }
    let entry = field(24, 4)?;
    let phoff = field(28, 4)?;
    let phentsize = field(42, 2)?;
    let phnum = field(44, 2)?;

    log::debug!("reading requested dynamic library \"{soname}\" at {bias:#x}");

    let mut total_size = 0u32;
    let mut dyn_addr = 0u32;
    let mut dyn_size = 0u32;
    for i in 0..phnum {
        let ph = (phoff + phentsize * i) as usize;
        let truncated =
            || parse_ehdr_error(format!("\"{soname}\" has a truncated program header table"));
        let p_type = read_uint(&file, ph, 4, endian).ok_or_else(truncated)?;
        match p_type {
            PT_INTERP => {}
            PT_DYNAMIC | PT_LOAD => {
                let p_offset = read_uint(&file, ph + 4, 4, endian).ok_or_else(truncated)?;
                let p_vaddr = read_uint(&file, ph + 8, 4, endian).ok_or_else(truncated)?;
                let p_filesz = read_uint(&file, ph + 16, 4, endian).ok_or_else(truncated)?;
                let p_memsz = read_uint(&file, ph + 20, 4, endian).ok_or_else(truncated)?;
                if p_type == PT_DYNAMIC {
                    dyn_addr = bias.wrapping_add(p_vaddr);
                    dyn_size = p_memsz;
                    // The DYNAMIC segment's bytes are loaded like any other.
                }
                let end = p_vaddr
                    .checked_add(p_memsz)
                    .filter(|end| bias.checked_add(*end).is_some_and(|e| (e as usize) <= image.len()))
                    .ok_or_else(|| {
                        image_error(format!(
                            "not enough target memory to load the requested shared library \"{soname}\""
                        ))
                    })?;
                total_size = total_size.max(end);

                if p_filesz > p_memsz {
                    return Err(parse_ehdr_error(format!(
                        "\"{soname}\" has a segment larger in file than in memory"
                    )));
                }
                let src = (p_offset as usize)
                    .checked_add(p_filesz as usize)
                    .and_then(|end| file.get(p_offset as usize..end))
                    .ok_or_else(|| io_error(format!("\"{soname}\" has a truncated segment")))?;
                let dst = image.bytes_mut(bias + p_vaddr, p_memsz as usize)?;
                dst[..p_filesz as usize].copy_from_slice(src);
                dst[p_filesz as usize..].fill(0);
                log::trace!(
                    "segment [{:#x}, +{:#x}) of \"{soname}\" loaded ({:#x} bytes from file)",
                    bias + p_vaddr,
                    p_memsz,
                    p_filesz
                );
            }
            _ => {}
        }
    }

    Ok(LoadedObject {
        total_size,
        dyn_addr,
        dyn_size,
        entry: bias.wrapping_add(entry),
    })
}

/// Soname identity ignores directories: `/opt/t/libm.so` and `libm.so` name
/// the same library.
pub fn strip_path(soname: &str) -> &str {
    soname.rsplit('/').next().unwrap_or(soname)
}
