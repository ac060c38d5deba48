//! Import-stub resolution through the indirect symbol table.
//!
//! `S_SYMBOL_STUBS` sections hold fixed-size jump stubs; each stub's slot
//! in the indirect symbol table names the imported symbol it forwards to.
//! The resulting map answers the builder's external-function queries at
//! *original* (pre-slide) addresses.

use object::macho::{self, DysymtabCommand, MachHeader64, Nlist64, SymtabCommand};
use object::pod;
use object::read::macho::{LoadCommandVariant, MachHeader, Segment};
use object::{Endianness, U32};
use rustc_hash::FxHashMap;
use tracing::trace;

use odis_cfg::Symbolizer;

use crate::file::trim_nul;
use crate::{MachoError, Result};

/// Maps original stub addresses to imported function names.
#[derive(Debug, Default)]
pub struct StubSymbolizer {
    stubs: FxHashMap<u64, String>,
}

impl StubSymbolizer {
    /// Build the stub map from a 64-bit Mach-O file.
    pub fn from_macho(data: &[u8]) -> Result<Self> {
        let header = MachHeader64::<Endianness>::parse(data, 0)?;
        let endian = header.endian()?;

        let mut symtab: Option<&SymtabCommand<Endianness>> = None;
        let mut dysymtab: Option<&DysymtabCommand<Endianness>> = None;
        // (address, entry size, first indirect index, entry count)
        let mut stub_sections: Vec<(u64, u64, u32, u64)> = Vec::new();

        let mut commands = header.load_commands(endian, data, 0)?;
        while let Some(command) = commands.next()? {
            match command.variant()? {
                LoadCommandVariant::Segment64(segment, section_data) => {
                    for section in segment.sections(endian, section_data)? {
                        let flags = section.flags.get(endian);
                        if flags & macho::SECTION_TYPE != macho::S_SYMBOL_STUBS {
                            continue;
                        }
                        let stub_size = u64::from(section.reserved2.get(endian));
                        if stub_size == 0 {
                            continue;
                        }
                        stub_sections.push((
                            section.addr.get(endian),
                            stub_size,
                            section.reserved1.get(endian),
                            section.size.get(endian) / stub_size,
                        ));
                    }
                }
                LoadCommandVariant::Symtab(cmd) => symtab = Some(cmd),
                LoadCommandVariant::Dysymtab(cmd) => dysymtab = Some(cmd),
                _ => {}
            }
        }

        let mut stubs = FxHashMap::default();
        let (Some(symtab), Some(dysymtab)) = (symtab, dysymtab) else {
            return Ok(Self { stubs });
        };

        let indirectsymoff = dysymtab.indirectsymoff.get(endian) as usize;
        let indirect: &[U32<Endianness>] = pod::slice_from_bytes(
            data.get(indirectsymoff..).ok_or(MachoError::Malformed("indirect symbol table"))?,
            dysymtab.nindirectsyms.get(endian) as usize,
        )
        .map_err(|()| MachoError::Malformed("indirect symbol table"))?
        .0;
        let symoff = symtab.symoff.get(endian) as usize;
        let nlists: &[Nlist64<Endianness>] = pod::slice_from_bytes(
            data.get(symoff..).ok_or(MachoError::Malformed("symbol table"))?,
            symtab.nsyms.get(endian) as usize,
        )
        .map_err(|()| MachoError::Malformed("symbol table"))?
        .0;
        let stroff = symtab.stroff.get(endian) as usize;
        let strings = data
            .get(stroff..stroff + symtab.strsize.get(endian) as usize)
            .ok_or(MachoError::Malformed("string table"))?;

        for (addr, stub_size, first, count) in stub_sections {
            for k in 0..count {
                let Some(entry) = indirect.get(first as usize + k as usize) else {
                    continue;
                };
                let sym_index = entry.get(endian);
                if sym_index & (macho::INDIRECT_SYMBOL_LOCAL | macho::INDIRECT_SYMBOL_ABS) != 0 {
                    continue;
                }
                let Some(nlist) = nlists.get(sym_index as usize) else {
                    continue;
                };
                let strx = nlist.n_strx.get(endian) as usize;
                let Some(tail) = strings.get(strx..) else {
                    continue;
                };
                let name = String::from_utf8_lossy(trim_nul(tail)).into_owned();
                if name.is_empty() {
                    continue;
                }
                let stub_addr = addr + k * stub_size;
                trace!(name = %name, "import stub at {stub_addr:#x}");
                stubs.insert(stub_addr, name);
            }
        }

        Ok(Self { stubs })
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Stub entries as `(original address, name)` pairs, sorted by address.
    pub fn entries(&self) -> Vec<(u64, &str)> {
        let mut entries: Vec<(u64, &str)> = self
            .stubs
            .iter()
            .map(|(&addr, name)| (addr, name.as_str()))
            .collect();
        entries.sort_unstable_by_key(|&(addr, _)| addr);
        entries
    }
}

impl Symbolizer for StubSymbolizer {
    fn external_function_at(&self, original: u64) -> Option<&str> {
        self.stubs.get(&original).map(String::as_str)
    }
}
