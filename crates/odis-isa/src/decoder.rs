//! Capstone-backed [`InsnDecoder`] implementation.

use capstone::arch::{ArchOperand, BuildsCapstone};
use capstone::{arch, Capstone, InsnDetail, InsnGroupType};

use odis_cfg::{Arch, DecodeStep, Insn, InsnDecoder, InsnKind};

use crate::Result;

/// Single-instruction decoder over capstone, pinned to one target.
pub struct CapstoneDecoder {
    cs: Capstone,
    arch: Arch,
}

impl CapstoneDecoder {
    pub fn new(arch: Arch) -> Result<Self> {
        let cs = match arch {
            Arch::X86_64 => Capstone::new()
                .x86()
                .mode(arch::x86::ArchMode::Mode64)
                .detail(true)
                .build()?,
            Arch::Aarch64 => Capstone::new()
                .arm64()
                .mode(arch::arm64::ArchMode::Arm)
                .detail(true)
                .build()?,
        };
        Ok(Self { cs, arch })
    }

    /// Invalid-byte advance: x86 resynchronizes per byte, AArch64 per word.
    fn invalid_skip(&self) -> u64 {
        match self.arch {
            Arch::X86_64 => 1,
            Arch::Aarch64 => 4,
        }
    }

    fn is_conditional(&self, mnemonic: &str) -> bool {
        match self.arch {
            // Everything in the jump group except the plain jumps has a
            // fall-through path (jcc, loop, jcxz, ...).
            Arch::X86_64 => !matches!(mnemonic, "jmp" | "ljmp"),
            Arch::Aarch64 => {
                mnemonic.starts_with("b.") || matches!(mnemonic, "cbz" | "cbnz" | "tbz" | "tbnz")
            }
        }
    }

    fn classify(&self, mnemonic: &str, detail: &InsnDetail) -> InsnKind {
        let has_group = |group: u32| {
            detail
                .groups()
                .iter()
                .any(|id| u32::from(id.0) == group)
        };
        let is_call = has_group(InsnGroupType::CS_GRP_CALL);
        let is_return = has_group(InsnGroupType::CS_GRP_RET)
            || has_group(InsnGroupType::CS_GRP_IRET)
            || mnemonic == "ret";
        let is_branch = has_group(InsnGroupType::CS_GRP_JUMP) && !is_call && !is_return;
        InsnKind {
            is_branch,
            is_conditional: is_branch && self.is_conditional(mnemonic),
            is_call,
            is_return,
            is_terminator: is_branch || is_return,
        }
    }

    /// Immediate operand of a relative branch or call: the absolute target
    /// as resolved at the decode address.
    fn immediate_target(detail: &InsnDetail) -> Option<u64> {
        for operand in detail.arch_detail().operands() {
            match operand {
                ArchOperand::X86Operand(op) => {
                    if let arch::x86::X86OperandType::Imm(value) = op.op_type {
                        return Some(value as u64);
                    }
                }
                ArchOperand::Arm64Operand(op) => {
                    if let arch::arm64::Arm64OperandType::Imm(value) = op.op_type {
                        return Some(value as u64);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

impl InsnDecoder for CapstoneDecoder {
    fn decode(&self, bytes: &[u8], addr: u64) -> DecodeStep {
        let Ok(insns) = self.cs.disasm_count(bytes, addr, 1) else {
            return DecodeStep::Invalid {
                skip: self.invalid_skip(),
            };
        };
        let Some(insn) = insns.iter().next() else {
            return DecodeStep::Invalid {
                skip: self.invalid_skip(),
            };
        };

        let size = insn.bytes().len() as u64;
        let mnemonic = insn.mnemonic().unwrap_or_default().to_string();
        let operands = insn.op_str().unwrap_or_default().to_string();

        let (kind, rel_target) = match self.cs.insn_detail(&insn) {
            Ok(detail) => {
                let kind = self.classify(&mnemonic, &detail);
                let relative = detail
                    .groups()
                    .iter()
                    .any(|id| u32::from(id.0) == InsnGroupType::CS_GRP_BRANCH_RELATIVE);
                let rel_target = if relative {
                    Self::immediate_target(&detail)
                        .map(|target| (target as i64).wrapping_sub((addr + size) as i64))
                } else {
                    None
                };
                (kind, rel_target)
            }
            Err(_) => (InsnKind::plain(), None),
        };

        DecodeStep::Insn(
            Insn {
                opcode: insn.id().0,
                mnemonic,
                operands,
                kind,
                rel_target,
            },
            size,
        )
    }
}
