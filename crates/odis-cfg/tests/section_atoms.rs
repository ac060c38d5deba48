//! Linear (no-CFG) sweep: section atoms without edges.

mod common;

use common::{image_with_text, FixtureDecoder};
use odis_cfg::{Arch, LoadedImage, ObjectDisassembler, SectionClass, SectionInfo};

#[test]
fn test_text_runs_and_invalid_runs() {
    // mov add ret | two invalid bytes | nop ret
    let bytes = vec![0x02, 0x03, 0xc3, 0xff, 0xff, 0x01, 0xc3];
    let image = image_with_text(0x1000, bytes, &[]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(false).unwrap();

    let atoms: Vec<(u64, u64, bool)> = module
        .atoms()
        .map(|(_, a)| (a.start, a.end, a.is_text()))
        .collect();
    assert_eq!(
        atoms,
        vec![
            (0x1000, 0x1003, true),
            (0x1003, 0x1005, false),
            (0x1005, 0x1007, true),
        ]
    );

    // No functions in a linear build.
    assert_eq!(module.function_count(), 0);
    // The invalid run kept its bytes.
    let (_, data) = module.atoms().nth(1).unwrap();
    assert_eq!(data.data(), Some(&[0xff_u8, 0xff][..]));
}

#[test]
fn test_data_section_becomes_one_atom() {
    let mut image = LoadedImage::new(Arch::X86_64);
    image.sections.push(SectionInfo {
        name: "__const".to_string(),
        addr: 0x4000,
        size: 4,
        bytes: Some(vec![1, 2, 3, 4]),
        class: SectionClass::Data,
    });
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(false).unwrap();

    assert_eq!(module.atom_count(), 1);
    let (_, atom) = module.atoms().next().unwrap();
    assert!(atom.is_data());
    assert_eq!((atom.start, atom.end), (0x4000, 0x4004));
    assert_eq!(atom.name.as_deref(), Some("__const"));
}

#[test]
fn test_sections_without_contents_skipped() {
    let mut image = LoadedImage::new(Arch::X86_64);
    image.sections.push(SectionInfo {
        name: "__bss".to_string(),
        addr: 0x5000,
        size: 0x100,
        bytes: None,
        class: SectionClass::Data,
    });
    image.sections.push(SectionInfo {
        name: "__truncated".to_string(),
        addr: 0x6000,
        size: 0x100,
        bytes: Some(vec![0; 4]),
        class: SectionClass::Text,
    });
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(false).unwrap();
    assert_eq!(module.atom_count(), 0);
}

#[test]
fn test_slide_applied_to_atoms() {
    let mut image = image_with_text(0x1000, vec![0x02, 0xc3], &[("f", 0x1000)]);
    image.slide = 0x10000;
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();

    assert!(module.function_at(0x11000).is_some());
    let (_, atom) = module.atoms().next().unwrap();
    assert_eq!((atom.start, atom.end), (0x11000, 0x11002));
}
