//! Shared fixtures: a byte-per-opcode decoder and image builders.
//!
//! Fixture encoding, one or two bytes per instruction:
//!   0x01 nop, 0x02 mov, 0x03 add, 0x04 cmp         (1 byte, plain)
//!   0xc3 ret                                        (1 byte, terminator)
//!   0xe9 <disp i8> jmp                              (2 bytes, branch)
//!   0x74 <disp i8> je                               (2 bytes, cond branch)
//!   0xe8 <disp i8> call                             (2 bytes, call)
//! Anything else is invalid and skips one byte. Displacements are relative
//! to the end of the instruction.

use odis_cfg::{
    Arch, DecodeStep, Insn, InsnDecoder, InsnKind, LoadedImage, SectionClass, SectionInfo,
    SymbolClass, SymbolInfo, Symbolizer,
};

pub struct FixtureDecoder;

fn insn(opcode: u32, mnemonic: &str, kind: InsnKind, rel_target: Option<i64>) -> Insn {
    Insn {
        opcode,
        mnemonic: mnemonic.to_string(),
        operands: String::new(),
        kind,
        rel_target,
    }
}

impl InsnDecoder for FixtureDecoder {
    fn decode(&self, bytes: &[u8], _addr: u64) -> DecodeStep {
        let Some(&opcode) = bytes.first() else {
            return DecodeStep::Invalid { skip: 1 };
        };
        let simple = |mnemonic: &str, kind: InsnKind| {
            DecodeStep::Insn(insn(opcode as u32, mnemonic, kind, None), 1)
        };
        let relative = |mnemonic: &str, kind: InsnKind| match bytes.get(1) {
            Some(&disp) => DecodeStep::Insn(
                insn(opcode as u32, mnemonic, kind, Some(disp as i8 as i64)),
                2,
            ),
            None => DecodeStep::Invalid { skip: 1 },
        };
        match opcode {
            0x01 => simple("nop", InsnKind::plain()),
            0x02 => simple("mov", InsnKind::plain()),
            0x03 => simple("add", InsnKind::plain()),
            0x04 => simple("cmp", InsnKind::plain()),
            0xc3 => simple("ret", InsnKind::ret()),
            0xe9 => relative("jmp", InsnKind::branch(false)),
            0x74 => relative("je", InsnKind::branch(true)),
            0xe8 => relative("call", InsnKind::call()),
            _ => DecodeStep::Invalid { skip: 1 },
        }
    }
}

/// Displacement byte for a 2-byte instruction at `addr` targeting `target`.
pub fn disp(addr: u64, target: u64) -> u8 {
    (target.wrapping_sub(addr + 2) as i64) as i8 as u8
}

/// Image with one text section and function symbols.
pub fn image_with_text(
    addr: u64,
    bytes: Vec<u8>,
    functions: &[(&str, u64)],
) -> LoadedImage {
    let mut image = LoadedImage::new(Arch::X86_64);
    image.sections.push(SectionInfo {
        name: "__text".to_string(),
        addr,
        size: bytes.len() as u64,
        bytes: Some(bytes),
        class: SectionClass::Text,
    });
    image.symbols = functions
        .iter()
        .map(|&(name, addr)| SymbolInfo {
            name: name.to_string(),
            addr,
            class: SymbolClass::Function,
        })
        .collect();
    image
}

/// Symbolizer over a fixed `(original address, name)` table.
pub struct MapSymbolizer {
    entries: Vec<(u64, String)>,
}

impl MapSymbolizer {
    pub fn new(entries: &[(u64, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|&(addr, name)| (addr, name.to_string()))
                .collect(),
        }
    }
}

impl Symbolizer for MapSymbolizer {
    fn external_function_at(&self, original: u64) -> Option<&str> {
        self.entries
            .iter()
            .find(|(addr, _)| *addr == original)
            .map(|(_, name)| name.as_str())
    }
}
