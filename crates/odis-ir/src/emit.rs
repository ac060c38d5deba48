//! Textual emission of lowered modules.

use std::io::{self, Write};

use crate::{ModuleIr, Terminator};

/// Write the module as text, one function at a time.
pub fn write_module<W: Write>(out: &mut W, module: &ModuleIr) -> io::Result<()> {
    if let Some(entry) = module.entry {
        writeln!(out, "; entry {entry:#x}")?;
    }
    for func in &module.funcs {
        if func.is_external() {
            writeln!(out, "declare @{}", func.name)?;
            continue;
        }
        writeln!(out, "define @{} {{", func.name)?;
        for block in &func.blocks {
            writeln!(out, "bb_{:x}:", block.start)?;
            for inst in &block.insts {
                writeln!(out, "  {:#x}: {}", inst.addr, inst.text)?;
            }
            match &block.term {
                Terminator::Return => writeln!(out, "  ret")?,
                Terminator::Jump { target } => writeln!(out, "  br bb_{target:x}")?,
                Terminator::CondJump {
                    target,
                    fall: Some(fall),
                } => writeln!(out, "  br.cond bb_{target:x}, bb_{fall:x}")?,
                Terminator::CondJump { target, fall: None } => {
                    writeln!(out, "  br.cond bb_{target:x}")?
                }
                Terminator::IndirectJump => writeln!(out, "  br.indirect")?,
                Terminator::TailCall {
                    name: Some(name), ..
                } => writeln!(out, "  tail @{name}")?,
                Terminator::TailCall { target, name: None } => {
                    writeln!(out, "  tail {target:#x}")?
                }
                Terminator::Fall { next } => writeln!(out, "  br bb_{next:x}")?,
                Terminator::Unreachable => writeln!(out, "  unreachable")?,
            }
        }
        writeln!(out, "}}")?;
    }
    Ok(())
}
