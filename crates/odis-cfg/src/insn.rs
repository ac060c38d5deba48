//! Decoded instructions and the decoder/symbolizer seams.

/// Control-flow classification of a decoded instruction.
///
/// Populated by the decoder backend at decode time; the builder only ever
/// consults these flags, never the raw encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InsnKind {
    /// Transfers control to another address (conditionally or not).
    pub is_branch: bool,
    /// Branch with a fall-through path.
    pub is_conditional: bool,
    /// Call (has a fall-through return site, not a terminator).
    pub is_call: bool,
    /// Function return.
    pub is_return: bool,
    /// Ends a basic block (branch, return, trap).
    pub is_terminator: bool,
}

impl InsnKind {
    /// Plain instruction with no control-flow effect.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Unconditional or conditional branch.
    pub fn branch(conditional: bool) -> Self {
        Self {
            is_branch: true,
            is_conditional: conditional,
            is_terminator: true,
            ..Self::default()
        }
    }

    /// Call instruction.
    pub fn call() -> Self {
        Self {
            is_call: true,
            ..Self::default()
        }
    }

    /// Return instruction.
    pub fn ret() -> Self {
        Self {
            is_return: true,
            is_terminator: true,
            ..Self::default()
        }
    }
}

/// A single decoded machine instruction.
///
/// The value is position independent: a statically evaluable branch target
/// is stored as a displacement relative to the end of the instruction, so
/// equal raw bytes decode to equal `Insn`s regardless of address. This is
/// what makes cached instructions reusable at other addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Insn {
    /// Backend-specific opcode identifier.
    pub opcode: u32,
    /// Mnemonic, e.g. `jmp`.
    pub mnemonic: String,
    /// Operand text as rendered by the backend.
    pub operands: String,
    /// Control-flow classification.
    pub kind: InsnKind,
    /// Displacement of a statically evaluable branch or call target,
    /// relative to the end of the instruction. `None` for indirect or
    /// non-branching instructions.
    pub rel_target: Option<i64>,
}

impl Insn {
    pub fn is_branch(&self) -> bool {
        self.kind.is_branch
    }

    pub fn is_conditional_branch(&self) -> bool {
        self.kind.is_branch && self.kind.is_conditional
    }

    pub fn is_call(&self) -> bool {
        self.kind.is_call
    }

    pub fn is_return(&self) -> bool {
        self.kind.is_return
    }

    pub fn is_terminator(&self) -> bool {
        self.kind.is_terminator
    }

    /// Statically evaluate the branch target for an instance of this
    /// instruction decoded at `addr` with `size` bytes.
    pub fn branch_target(&self, addr: u64, size: u64) -> Option<u64> {
        self.rel_target
            .map(|disp| addr.wrapping_add(size).wrapping_add(disp as u64))
    }
}

/// Outcome of one decode step over a byte window.
#[derive(Clone, Debug)]
pub enum DecodeStep {
    /// A valid instruction consuming `size` bytes.
    Insn(Insn, u64),
    /// Undecodable bytes; `skip` is the nonzero number of bytes to advance
    /// over as invalid data.
    Invalid { skip: u64 },
}

/// Single-instruction decoder for a fixed target.
///
/// `bytes` starts at `addr` and extends to the end of the window the caller
/// is willing to let the instruction occupy.
pub trait InsnDecoder {
    fn decode(&self, bytes: &[u8], addr: u64) -> DecodeStep;
}

/// Resolves addresses of external (imported) functions.
pub trait Symbolizer {
    /// Name of the external function (stub, dynamic import) at the
    /// *original* (pre-slide) address, if any.
    fn external_function_at(&self, original: u64) -> Option<&str>;
}
