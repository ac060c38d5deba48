//! Loading a 64-bit Mach-O file into the image model.

use object::macho::MachHeader64;
use object::read::macho::{LoadCommandVariant, MachHeader, MachOFile64, Segment};
use object::{Architecture, Endianness, Object, ObjectSection, ObjectSymbol, SectionKind, SymbolKind};
use tracing::{debug, trace};

use odis_cfg::{Arch, LoadedImage, SectionClass, SectionInfo, SymbolClass, SymbolInfo};

use crate::{MachoError, Result};

/// Load a 64-bit Mach-O image with the given load-time slide.
pub fn load(data: &[u8], slide: u64) -> Result<LoadedImage> {
    let file = MachOFile64::<Endianness>::parse(data)?;

    let arch = match file.architecture() {
        Architecture::X86_64 => Arch::X86_64,
        Architecture::Aarch64 => Arch::Aarch64,
        _ => return Err(MachoError::UnsupportedArch),
    };

    let mut image = LoadedImage::new(arch);
    image.slide = slide;

    for section in file.sections() {
        let name = section.name().unwrap_or_default().to_string();
        let class = match section.kind() {
            SectionKind::Text => SectionClass::Text,
            SectionKind::Data
            | SectionKind::ReadOnlyData
            | SectionKind::ReadOnlyString
            | SectionKind::UninitializedData => SectionClass::Data,
            _ => SectionClass::Other,
        };
        let bytes = section.data().ok().map(<[u8]>::to_vec);
        trace!("section {name} at {:#x}", section.address());
        image.sections.push(SectionInfo {
            name,
            addr: section.address(),
            size: section.size(),
            bytes,
            class,
        });
    }

    for symbol in file.symbols() {
        if symbol.is_undefined() {
            continue;
        }
        let Ok(name) = symbol.name() else {
            continue;
        };
        let addr = symbol.address();
        let class = match symbol.kind() {
            SymbolKind::Text => SymbolClass::Function,
            SymbolKind::Data => SymbolClass::Data,
            // Some toolchains leave the kind unset; fall back to the
            // containing section.
            _ => match section_class_at(&image.sections, addr) {
                Some(SectionClass::Text) => SymbolClass::Function,
                Some(SectionClass::Data) => SymbolClass::Data,
                _ => SymbolClass::Other,
            },
        };
        image.symbols.push(SymbolInfo {
            name: name.to_string(),
            addr,
            class,
        });
    }

    let raw = scan_load_commands(data)?;
    image.init_functions = raw
        .init_funcs
        .iter()
        .map(|&a| image.effective_addr(a))
        .collect();
    image.exit_functions = raw
        .exit_funcs
        .iter()
        .map(|&a| image.effective_addr(a))
        .collect();

    image.entrypoint = match raw.entryoff {
        Some(entryoff) if entryoff != 0 => {
            Some(slide + raw.text_vmaddr.unwrap_or(0) + entryoff)
        }
        _ => image
            .lookup_symbol("main")
            .or_else(|| image.lookup_symbol("_main")),
    };

    debug!(
        sections = image.sections.len(),
        symbols = image.symbols.len(),
        "loaded Mach-O image"
    );
    Ok(image)
}

fn section_class_at(sections: &[SectionInfo], addr: u64) -> Option<SectionClass> {
    sections
        .iter()
        .find(|s| addr >= s.addr && addr < s.addr + s.size)
        .map(|s| s.class)
}

struct RawInfo {
    entryoff: Option<u64>,
    text_vmaddr: Option<u64>,
    init_funcs: Vec<u64>,
    exit_funcs: Vec<u64>,
}

/// Walk the load commands for what the high-level API does not expose:
/// `LC_MAIN` and the static init/exit pointer arrays.
fn scan_load_commands(data: &[u8]) -> Result<RawInfo> {
    let header = MachHeader64::<Endianness>::parse(data, 0)?;
    let endian = header.endian()?;

    let mut info = RawInfo {
        entryoff: None,
        text_vmaddr: None,
        init_funcs: Vec::new(),
        exit_funcs: Vec::new(),
    };

    let mut commands = header.load_commands(endian, data, 0)?;
    while let Some(command) = commands.next()? {
        match command.variant()? {
            LoadCommandVariant::Segment64(segment, section_data) => {
                if segment.segname == *b"__TEXT\0\0\0\0\0\0\0\0\0\0" {
                    info.text_vmaddr = Some(segment.vmaddr.get(endian));
                }
                for section in segment.sections(endian, section_data)? {
                    let name = trim_nul(&section.sectname);
                    if name != b"__mod_init_func" && name != b"__mod_exit_func" {
                        continue;
                    }
                    let funcs = read_pointer_array(
                        data,
                        section.offset.get(endian) as usize,
                        section.size.get(endian) as usize,
                        endian,
                    )?;
                    trace!(
                        section = %String::from_utf8_lossy(name),
                        count = funcs.len(),
                        "static function pointer array"
                    );
                    if name == b"__mod_init_func" {
                        info.init_funcs = funcs;
                    } else {
                        info.exit_funcs = funcs;
                    }
                }
            }
            LoadCommandVariant::EntryPoint(entry) => {
                info.entryoff = Some(entry.entryoff.get(endian));
            }
            _ => {}
        }
    }

    Ok(info)
}

/// Packed little-endian `u64` array in the file at `offset`.
fn read_pointer_array(
    data: &[u8],
    offset: usize,
    size: usize,
    endian: Endianness,
) -> Result<Vec<u64>> {
    let bytes = data
        .get(offset..offset + size)
        .ok_or(MachoError::Malformed("function pointer array"))?;
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let raw = u64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes"));
            if endian == Endianness::Little {
                raw
            } else {
                raw.swap_bytes()
            }
        })
        .collect())
}

pub(crate) fn trim_nul(name: &[u8]) -> &[u8] {
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    &name[..end]
}
