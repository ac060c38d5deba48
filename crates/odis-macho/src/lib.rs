//! Mach-O image loading for the disassembler.
//!
//! Produces the [`odis_cfg::LoadedImage`] model from 64-bit Mach-O files:
//! section and symbol scan, `LC_MAIN` entrypoint, static init/exit arrays,
//! and a [`StubSymbolizer`] over the indirect symbol table.

mod file;
mod stubs;
pub mod testing;

pub use file::load;
pub use stubs::StubSymbolizer;

use thiserror::Error;

/// Mach-O loading errors.
#[derive(Error, Debug)]
pub enum MachoError {
    #[error("object parse error: {0}")]
    Object(#[from] object::read::Error),
    #[error("unsupported architecture")]
    UnsupportedArch,
    #[error("malformed {0}")]
    Malformed(&'static str),
}

pub type Result<T> = std::result::Result<T, MachoError>;
