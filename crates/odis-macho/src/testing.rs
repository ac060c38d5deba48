//! Hand-assembled Mach-O fixtures for tests.
//!
//! Emits a minimal 64-bit little-endian Mach-O executable: one `__TEXT`-style
//! segment holding every declared section, plus `LC_SYMTAB`, `LC_DYSYMTAB`,
//! and an optional `LC_MAIN`.

const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_EXECUTE: u32 = 2;
const CPU_TYPE_X86_64: u32 = 0x0100_0007;
const CPU_SUBTYPE_X86_64_ALL: u32 = 3;

const LC_SEGMENT_64: u32 = 0x19;
const LC_SYMTAB: u32 = 0x2;
const LC_DYSYMTAB: u32 = 0xb;
const LC_MAIN: u32 = 0x8000_0028;

const S_SYMBOL_STUBS: u32 = 0x8;
const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;

const HEADER_SIZE: usize = 32;
const SEGMENT_CMD_SIZE: usize = 72;
const SECTION_SIZE: usize = 80;
const ENTRY_CMD_SIZE: usize = 24;
const SYMTAB_CMD_SIZE: usize = 24;
const DYSYMTAB_CMD_SIZE: usize = 80;
const NLIST_SIZE: usize = 16;

struct SectionSpec {
    sectname: &'static str,
    segname: &'static str,
    addr: u64,
    bytes: Vec<u8>,
    flags: u32,
    reserved1: u32,
    reserved2: u32,
}

struct SymbolSpec {
    name: String,
    n_type: u8,
    n_sect: u8,
    value: u64,
}

/// Builder for synthetic Mach-O images.
#[derive(Default)]
pub struct MachoBuilder {
    sections: Vec<SectionSpec>,
    symbols: Vec<SymbolSpec>,
    indirect: Vec<u32>,
    entryoff: Option<u64>,
}

impl MachoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_section(mut self, name: &'static str, addr: u64, bytes: Vec<u8>) -> Self {
        self.sections.push(SectionSpec {
            sectname: name,
            segname: "__TEXT",
            addr,
            bytes,
            flags: S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS,
            reserved1: 0,
            reserved2: 0,
        });
        self
    }

    pub fn data_section(mut self, name: &'static str, addr: u64, bytes: Vec<u8>) -> Self {
        self.sections.push(SectionSpec {
            sectname: name,
            segname: "__DATA",
            addr,
            bytes,
            flags: 0,
            reserved1: 0,
            reserved2: 0,
        });
        self
    }

    /// `S_SYMBOL_STUBS` section; `first_indirect` indexes the indirect
    /// symbol table, `stub_size` is the per-stub byte size.
    pub fn stub_section(
        mut self,
        name: &'static str,
        addr: u64,
        bytes: Vec<u8>,
        first_indirect: u32,
        stub_size: u32,
    ) -> Self {
        self.sections.push(SectionSpec {
            sectname: name,
            segname: "__TEXT",
            addr,
            bytes,
            flags: S_SYMBOL_STUBS | S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS,
            reserved1: first_indirect,
            reserved2: stub_size,
        });
        self
    }

    /// Defined function symbol in the first section.
    pub fn function(mut self, name: &str, addr: u64) -> Self {
        self.symbols.push(SymbolSpec {
            name: name.to_string(),
            n_type: 0x0f, // N_SECT | N_EXT
            n_sect: 1,
            value: addr,
        });
        self
    }

    /// Undefined (imported) symbol.
    pub fn undefined(mut self, name: &str) -> Self {
        self.symbols.push(SymbolSpec {
            name: name.to_string(),
            n_type: 0x01, // N_UNDF | N_EXT
            n_sect: 0,
            value: 0,
        });
        self
    }

    pub fn indirect_symbols(mut self, entries: Vec<u32>) -> Self {
        self.indirect = entries;
        self
    }

    /// `LC_MAIN` entry offset, relative to the segment load address.
    pub fn entry(mut self, entryoff: u64) -> Self {
        self.entryoff = Some(entryoff);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let nsects = self.sections.len();
        let ncmds = 3 + usize::from(self.entryoff.is_some());
        let sizeofcmds = SEGMENT_CMD_SIZE
            + SECTION_SIZE * nsects
            + SYMTAB_CMD_SIZE
            + DYSYMTAB_CMD_SIZE
            + if self.entryoff.is_some() {
                ENTRY_CMD_SIZE
            } else {
                0
            };

        // Lay out the file payload after the load commands.
        let mut cursor = HEADER_SIZE + sizeofcmds;
        let mut section_offsets = Vec::with_capacity(nsects);
        for section in &self.sections {
            section_offsets.push(cursor as u32);
            cursor += section.bytes.len();
        }
        let indirectsymoff = cursor as u32;
        cursor += 4 * self.indirect.len();
        let symoff = cursor as u32;
        cursor += NLIST_SIZE * self.symbols.len();
        let stroff = cursor as u32;

        let mut strtab = vec![0u8];
        let mut string_offsets = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            string_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(symbol.name.as_bytes());
            strtab.push(0);
        }
        let filesize = cursor + strtab.len();

        let vmaddr = self.sections.iter().map(|s| s.addr).min().unwrap_or(0);
        let vmend = self
            .sections
            .iter()
            .map(|s| s.addr + s.bytes.len() as u64)
            .max()
            .unwrap_or(0);

        let mut out = Vec::with_capacity(filesize);

        // mach_header_64
        push_u32(&mut out, MH_MAGIC_64);
        push_u32(&mut out, CPU_TYPE_X86_64);
        push_u32(&mut out, CPU_SUBTYPE_X86_64_ALL);
        push_u32(&mut out, MH_EXECUTE);
        push_u32(&mut out, ncmds as u32);
        push_u32(&mut out, sizeofcmds as u32);
        push_u32(&mut out, 0); // flags
        push_u32(&mut out, 0); // reserved

        // segment_command_64 with all sections
        push_u32(&mut out, LC_SEGMENT_64);
        push_u32(&mut out, (SEGMENT_CMD_SIZE + SECTION_SIZE * nsects) as u32);
        push_name16(&mut out, "__TEXT");
        push_u64(&mut out, vmaddr);
        push_u64(&mut out, vmend.saturating_sub(vmaddr));
        push_u64(&mut out, 0); // fileoff
        push_u64(&mut out, filesize as u64);
        push_u32(&mut out, 7); // maxprot
        push_u32(&mut out, 5); // initprot
        push_u32(&mut out, nsects as u32);
        push_u32(&mut out, 0); // flags

        for (section, &offset) in self.sections.iter().zip(&section_offsets) {
            push_name16(&mut out, section.sectname);
            push_name16(&mut out, section.segname);
            push_u64(&mut out, section.addr);
            push_u64(&mut out, section.bytes.len() as u64);
            push_u32(&mut out, offset);
            push_u32(&mut out, 0); // align
            push_u32(&mut out, 0); // reloff
            push_u32(&mut out, 0); // nreloc
            push_u32(&mut out, section.flags);
            push_u32(&mut out, section.reserved1);
            push_u32(&mut out, section.reserved2);
            push_u32(&mut out, 0); // reserved3
        }

        if let Some(entryoff) = self.entryoff {
            push_u32(&mut out, LC_MAIN);
            push_u32(&mut out, ENTRY_CMD_SIZE as u32);
            push_u64(&mut out, entryoff);
            push_u64(&mut out, 0); // stacksize
        }

        // symtab_command
        push_u32(&mut out, LC_SYMTAB);
        push_u32(&mut out, SYMTAB_CMD_SIZE as u32);
        push_u32(&mut out, symoff);
        push_u32(&mut out, self.symbols.len() as u32);
        push_u32(&mut out, stroff);
        push_u32(&mut out, strtab.len() as u32);

        // dysymtab_command, only the indirect table populated
        push_u32(&mut out, LC_DYSYMTAB);
        push_u32(&mut out, DYSYMTAB_CMD_SIZE as u32);
        for _ in 0..12 {
            push_u32(&mut out, 0);
        }
        push_u32(&mut out, indirectsymoff);
        push_u32(&mut out, self.indirect.len() as u32);
        for _ in 0..4 {
            push_u32(&mut out, 0);
        }

        // Payload: section contents, indirect table, nlists, strings.
        for section in &self.sections {
            out.extend_from_slice(&section.bytes);
        }
        for entry in &self.indirect {
            push_u32(&mut out, *entry);
        }
        for (symbol, &strx) in self.symbols.iter().zip(&string_offsets) {
            push_u32(&mut out, strx);
            out.push(symbol.n_type);
            out.push(symbol.n_sect);
            out.extend_from_slice(&0u16.to_le_bytes());
            push_u64(&mut out, symbol.value);
        }
        out.extend_from_slice(&strtab);

        debug_assert_eq!(out.len(), filesize);
        out
    }
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_name16(out: &mut Vec<u8>, name: &str) {
    let mut buf = [0u8; 16];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&buf);
}
