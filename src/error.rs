use core::fmt::{Debug, Display};
use std::borrow::Cow;

use crate::object::ENV_LIBRARY_PATH;
use crate::relmap::RELMAP_FILENAME;

/// Error types used throughout the `elf_rtld` library.
///
/// Every variant except address-space exhaustion (which is reported through
/// sentinel return values, see [`crate::MemMap`]) is fatal for the whole load:
/// a partially linked target image cannot be safely executed, so the simulator
/// is expected to abort on any `Err` from [`crate::Rtld::initiate`].
#[derive(Debug)]
pub enum Error {
    /// An error occurred while opening or reading an ELF file.
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while validating an ELF header.
    ///
    /// Bad magic bytes, a non-32-bit class, a declared endianness that does
    /// not match the target image, or a non-loadable file type.
    ParseEhdr {
        /// A descriptive message naming the offending object.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing a `PT_DYNAMIC` segment.
    ///
    /// A shared object declaring no DYNAMIC segment where one is required,
    /// or dynamic entries that reference tables the object does not carry.
    ParseDynamic {
        /// A descriptive message naming the offending object.
        msg: Cow<'static, str>,
    },

    /// An access to the target memory image fell outside its bounds, or a
    /// segment does not fit into the configured memory size.
    Image {
        /// A descriptive message about the faulting access.
        msg: Cow<'static, str>,
    },

    /// A `DT_NEEDED` dependency was not found on the library search path.
    MissingLibrary {
        /// The soname of the missing library.
        soname: Cow<'static, str>,
    },

    /// A non-weak undefined symbol has no definition in any loaded object.
    UnresolvedSymbol {
        /// The name of the unresolved symbol.
        name: Cow<'static, str>,
    },

    /// A dependency lacks a required, non-weak version definition.
    ///
    /// Raised at load time, before any symbol resolution, so a stale library
    /// is rejected as a whole.
    VersionMismatch {
        /// The soname of the rejected library.
        soname: Cow<'static, str>,
    },

    /// A relocation entry carries a code the engine does not implement.
    UnknownRelocation {
        /// The relocation code, after translation through the relocation map.
        code: u32,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::ParseEhdr { msg } => write!(f, "ELF header parsing error: {msg}"),
            Error::ParseDynamic { msg } => write!(f, "dynamic segment parsing error: {msg}"),
            Error::Image { msg } => write!(f, "target image error: {msg}"),
            Error::MissingLibrary { soname } => write!(
                f,
                "could not find shared library \"{soname}\"; please properly configure the {ENV_LIBRARY_PATH} environment variable"
            ),
            Error::UnresolvedSymbol { name } => write!(f, "symbol \"{name}\" unknown"),
            Error::VersionMismatch { soname } => write!(
                f,
                "loaded library \"{soname}\" is old and can't be used (version mismatch)"
            ),
            Error::UnknownRelocation { code } => write!(
                f,
                "unknown relocation code {code}; if this dynamic object was not produced by \
                 a toolchain targeting this simulator, supply a {RELMAP_FILENAME} relocation \
                 map on the {ENV_LIBRARY_PATH} search path"
            ),
        }
    }
}

impl std::error::Error for Error {}

#[cold]
#[inline(never)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_ehdr_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseEhdr { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_dynamic_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseDynamic { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn image_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Image { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn missing_library(soname: impl Into<Cow<'static, str>>) -> Error {
    Error::MissingLibrary {
        soname: soname.into(),
    }
}

#[cold]
#[inline(never)]
pub(crate) fn unresolved_symbol(name: impl Into<Cow<'static, str>>) -> Error {
    Error::UnresolvedSymbol { name: name.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn version_mismatch(soname: impl Into<Cow<'static, str>>) -> Error {
    Error::VersionMismatch {
        soname: soname.into(),
    }
}

#[cold]
#[inline(never)]
pub(crate) fn unknown_relocation(code: u32) -> Error {
    Error::UnknownRelocation { code }
}
