//! Block terminators.

/// How control leaves a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    /// Function return.
    Return,
    /// Unconditional jump to a static target.
    Jump { target: u64 },
    /// Conditional branch; `fall` is absent when the fall-through path
    /// runs off the region.
    CondJump { target: u64, fall: Option<u64> },
    /// Jump through a register or memory; targets unknown.
    IndirectJump,
    /// Branch to an external function, ending this function.
    TailCall { target: u64, name: Option<String> },
    /// Fall through into the next block.
    Fall { next: u64 },
    /// No known way out (decode failure, region end).
    Unreachable,
}

impl Terminator {
    pub fn is_return(&self) -> bool {
        matches!(self, Self::Return)
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Self::Jump { .. } | Self::CondJump { .. } | Self::IndirectJump)
    }

    pub fn is_tail_call(&self) -> bool {
        matches!(self, Self::TailCall { .. })
    }

    /// Statically known successor addresses.
    pub fn static_targets(&self) -> Vec<u64> {
        match self {
            Self::Jump { target } => vec![*target],
            Self::CondJump { target, fall } => {
                let mut targets = vec![*target];
                targets.extend(fall);
                targets
            }
            Self::Fall { next } => vec![*next],
            _ => Vec::new(),
        }
    }
}
