//! Lowering a recovered module into block IR.

use odis_cfg::{DecodedInsn, Function, Module};

use crate::{BlockIr, FuncIr, InstIr, ModuleIr, Terminator};

/// Lower a recovered module. Functions come out sorted by entry address,
/// blocks by start address.
pub fn lower(module: &Module) -> ModuleIr {
    let mut funcs: Vec<FuncIr> = module
        .functions()
        .map(|(_, func)| lower_function(module, func))
        .collect();
    funcs.sort_by_key(|f| f.entry);
    ModuleIr {
        entry: module.entry,
        funcs,
    }
}

fn lower_function(module: &Module, func: &Function) -> FuncIr {
    let name = func
        .name
        .clone()
        .unwrap_or_else(|| format!("fn_{:x}", func.entry));

    let mut blocks: Vec<BlockIr> = func
        .blocks()
        .map(|(_, block)| {
            let atom = module.atom(block.atom);
            let insts = atom
                .insns()
                .unwrap_or_default()
                .iter()
                .map(|insn| InstIr {
                    addr: insn.addr,
                    text: render(insn),
                })
                .collect();
            let mut succs: Vec<u64> = block.succs.iter().map(|&s| func.block(s).start).collect();
            succs.sort_unstable();
            succs.dedup();
            BlockIr {
                start: atom.start,
                end: atom.end,
                term: terminator(module, atom.last_insn(), &succs),
                insts,
                succs,
            }
        })
        .collect();
    blocks.sort_by_key(|b| b.start);

    FuncIr {
        name,
        entry: func.entry,
        blocks,
    }
}

/// Derive the block terminator from its last instruction and its recorded
/// successors.
fn terminator(module: &Module, last: Option<&DecodedInsn>, succs: &[u64]) -> Terminator {
    let Some(last) = last else {
        return Terminator::Unreachable;
    };
    let insn = &last.insn;
    let target = insn.branch_target(last.addr, last.size);

    if insn.is_return() {
        return Terminator::Return;
    }

    if insn.is_branch() {
        let Some(target) = target else {
            return Terminator::IndirectJump;
        };
        if insn.is_conditional_branch() {
            let fall = succs.iter().copied().find(|&s| s != target);
            return Terminator::CondJump { target, fall };
        }
        if succs.contains(&target) {
            return Terminator::Jump { target };
        }
        // A branch whose target grew no intra-function edge but did
        // become a function is a tail call.
        if let Some(callee) = module.function_at(target) {
            return Terminator::TailCall {
                target,
                name: module.func(callee).name.clone(),
            };
        }
        return Terminator::Jump { target };
    }

    match succs.first() {
        Some(&next) => Terminator::Fall { next },
        None => Terminator::Unreachable,
    }
}

/// Instruction text. Branch targets are re-rendered per site so cached
/// instructions never leak a stale address through their operand string.
fn render(insn: &DecodedInsn) -> String {
    if let Some(target) = insn.insn.branch_target(insn.addr, insn.size) {
        return format!("{} {target:#x}", insn.insn.mnemonic);
    }
    if insn.insn.operands.is_empty() {
        insn.insn.mnemonic.clone()
    } else {
        format!("{} {}", insn.insn.mnemonic, insn.insn.operands)
    }
}
