//! # elf_rtld
//! A user-space ELF runtime dynamic linker embedded in an instruction-set simulator.
//!
//! The simulator owns a flat byte array modelling target memory. Given the primary
//! executable's `PT_DYNAMIC` address, this crate loads the transitive shared-library
//! dependencies into that array, adjusts and resolves symbols (including GNU symbol
//! versioning and weak binding), applies relocations eagerly, and hands back the
//! initializer/finalizer vectors and a suggested heap start.
//!
//! Everything runs once, synchronously, before simulated execution starts. All
//! multi-byte accesses to the image go through [`TargetImage`], which tracks the
//! image's declared endianness independently of the host's.
//!
//! ## Example
//! ```no_run
//! use elf_rtld::{Endian, Rtld, TargetImage};
//!
//! let mut mem = vec![0u8; 1 << 20];
//! // ... the simulator loads the executable into `mem` and finds PT_DYNAMIC ...
//! let mut image = TargetImage::new(&mut mem, Endian::Lsb);
//! let mut rtld = Rtld::new(4, 1 << 20);
//! let heap_ptr = rtld.initiate(&mut image, 0x2000, 0, 0x8000).unwrap();
//! ```

pub mod dynamic;
mod error;
pub mod image;
pub mod link;
pub mod memmap;
pub mod object;
pub mod relmap;
pub mod reloc;
pub mod rtld;
pub mod symbol;
pub mod symtab;
pub mod version;

pub use error::Error;
pub(crate) use error::{
    image_error, io_error, missing_library, parse_dynamic_error, parse_ehdr_error,
    unknown_relocation, unresolved_symbol, version_mismatch,
};
pub use image::{Endian, TargetImage};
pub use link::{LinkGraph, NodeId};
pub use memmap::{MAP_FAILED, MemMap};
pub use relmap::RelocationMap;
pub use rtld::{LoadedLibrary, Rtld};

pub type Result<T> = core::result::Result<T, Error>;
