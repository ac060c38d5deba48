//! odis - static Mach-O disassembler and lifter.
//!
//! Loads a 64-bit Mach-O image, recovers functions and basic blocks by
//! recursive disassembly, and lowers the result to a textual mid-level IR.
//!
//! # Example
//!
//! ```ignore
//! let data = std::fs::read("a.out")?;
//! let pipeline = odis::Pipeline::load(&data, 0)?;
//! let (ir, stats) = pipeline.lift(true)?;
//! ```

pub use odis_cfg::{
    Arch, CfgError, DecodeCache, DisasmStats, LoadedImage, Module, ObjectDisassembler,
};
pub use odis_ir::{lower, write_module, ModuleIr};
pub use odis_isa::{CapstoneDecoder, IsaError};
pub use odis_macho::{MachoError, StubSymbolizer};

mod pipeline;
pub use pipeline::Pipeline;

use thiserror::Error;

/// Driver errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Mach-O error: {0}")]
    Macho(#[from] MachoError),
    #[error("CFG error: {0}")]
    Cfg(#[from] CfgError),
    #[error("decoder error: {0}")]
    Isa(#[from] IsaError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
