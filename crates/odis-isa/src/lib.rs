//! Concrete instruction decoding for the disassembler.
//!
//! Wraps capstone for x86-64 and AArch64, classifying control flow from
//! instruction groups at decode time and recording statically evaluable
//! branch targets as end-relative displacements.

mod decoder;

pub use decoder::CapstoneDecoder;

use thiserror::Error;

/// Decoder construction errors.
#[derive(Error, Debug)]
pub enum IsaError {
    #[error("capstone error: {0}")]
    Capstone(#[from] capstone::Error),
}

pub type Result<T> = std::result::Result<T, IsaError>;
