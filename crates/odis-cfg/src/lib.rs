//! Control-flow recovery for machine-code images.
//!
//! Takes a loaded object image (sections, symbols, load-time slide) and
//! recovers a module of text/data atoms, basic blocks, and functions by
//! iterative recursive disassembly. Decoding goes through a pluggable
//! [`InsnDecoder`] and is amortized by a frequency-biased [`DecodeCache`];
//! external (imported) functions are resolved through a [`Symbolizer`].

mod builder;
mod cache;
mod image;
mod insn;
mod module;
mod region;

pub use builder::{DisasmStats, ObjectDisassembler};
pub use cache::DecodeCache;
pub use image::{Arch, LoadedImage, SectionClass, SectionInfo, SymbolClass, SymbolInfo};
pub use insn::{DecodeStep, Insn, InsnDecoder, InsnKind, Symbolizer};
pub use module::{Atom, AtomId, BasicBlock, BlockId, DecodedInsn, FuncId, Function, Module};
pub use region::{Region, RegionMap};

use thiserror::Error;

/// Control-flow recovery errors.
#[derive(Error, Debug)]
pub enum CfgError {
    #[error("atom split at {0:#x} does not fall on an instruction boundary")]
    MidInstructionSplit(u64),
    #[error("cannot split data atom at {0:#x}")]
    SplitDataAtom(u64),
    #[error("no basic block could be recovered at {0:#x}")]
    NoBlockAt(u64),
}

pub type Result<T> = std::result::Result<T, CfgError>;
