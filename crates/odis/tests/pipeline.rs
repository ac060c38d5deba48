//! End-to-end: synthetic Mach-O with real x86-64 code, through load,
//! recovery, lowering, and emission.

use odis::Pipeline;
use odis_ir::Terminator;
use odis_macho::testing::MachoBuilder;

/// Three small functions:
///   _main: push rbp; mov rbp, rsp; pop rbp; ret
///   _f1:   xor eax, eax; je +2; inc eax; ret
///   _f2:   jmp _printf_stub (tail call)
fn sample() -> Vec<u8> {
    #[rustfmt::skip]
    let text = vec![
        // 0x1000 _main
        0x55,                   // push rbp
        0x48, 0x89, 0xe5,       // mov rbp, rsp
        0x5d,                   // pop rbp
        0xc3,                   // ret
        // 0x1006 _f1
        0x31, 0xc0,             // xor eax, eax
        0x74, 0x02,             // je 0x100c
        0xff, 0xc0,             // inc eax
        0xc3,                   // ret
        // 0x100d _f2
        0xe9, 0xee, 0x0f, 0x00, 0x00, // jmp 0x2000
    ];
    // One six-byte jump stub forwarding to _printf.
    let stub = vec![0xff, 0x25, 0x00, 0x00, 0x00, 0x00];

    MachoBuilder::new()
        .text_section("__text", 0x1000, text)
        .stub_section("__stubs", 0x2000, stub, 0, 6)
        .function("_main", 0x1000)
        .function("_f1", 0x1006)
        .function("_f2", 0x100d)
        .undefined("_printf")
        .indirect_symbols(vec![3])
        .build()
}

#[test]
fn test_lift_sample_binary() {
    let data = sample();
    let pipeline = Pipeline::load(&data, 0).unwrap();
    assert_eq!(pipeline.image().entrypoint, Some(0x1000));

    let (module, stats) = pipeline.disassemble(true).unwrap();
    assert!(stats.translated > 0);

    // _main, _f1, _f2, plus the _printf stub function.
    assert_eq!(module.function_count(), 4);

    let main = module.func(module.function_at(0x1000).unwrap());
    assert_eq!(main.len(), 1);
    let entry = module.atom(main.block(main.entry_block().unwrap()).atom);
    assert_eq!((entry.start, entry.end), (0x1000, 0x1006));
    assert_eq!(entry.insns().unwrap().len(), 4);

    // The conditional in _f1 forces a split at its ret.
    let f1 = module.func(module.function_at(0x1006).unwrap());
    assert_eq!(f1.len(), 3);
    let b0 = f1.block(f1.block_at(0x1006).unwrap());
    let mut succs: Vec<u64> = b0.succs.iter().map(|&s| f1.block(s).start).collect();
    succs.sort_unstable();
    assert_eq!(succs, vec![0x100a, 0x100c]);

    // The tail call produced a named external function and no edge.
    let f2 = module.func(module.function_at(0x100d).unwrap());
    assert!(f2.block(f2.entry_block().unwrap()).succs.is_empty());
    let printf = module.func(module.function_at(0x2000).unwrap());
    assert_eq!(printf.name.as_deref(), Some("_printf"));
    assert!(printf.is_empty());
}

#[test]
fn test_lift_to_ir_text() {
    let data = sample();
    let pipeline = Pipeline::load(&data, 0).unwrap();
    let (ir, _) = pipeline.lift(true).unwrap();

    let f2 = ir.funcs.iter().find(|f| f.name == "_f2").unwrap();
    assert_eq!(
        f2.blocks[0].term,
        Terminator::TailCall {
            target: 0x2000,
            name: Some("_printf".to_string())
        }
    );

    let mut out = Vec::new();
    odis::write_module(&mut out, &ir).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("; entry 0x1000"));
    assert!(text.contains("define @_main {"));
    assert!(text.contains("bb_1006:"));
    assert!(text.contains("br.cond bb_100c, bb_100a"));
    assert!(text.contains("tail @_printf"));
    assert!(text.contains("declare @_printf"));
}

#[test]
fn test_linear_analysis_produces_atoms_only() {
    let data = sample();
    let pipeline = Pipeline::load(&data, 0).unwrap();
    let (module, _) = pipeline.disassemble(false).unwrap();
    assert_eq!(module.function_count(), 0);
    assert!(module.atom_count() > 0);
}

#[test]
fn test_lift_with_slide() {
    let data = sample();
    let pipeline = Pipeline::load(&data, 0x4000).unwrap();
    assert_eq!(pipeline.image().entrypoint, Some(0x5000));
    let (module, _) = pipeline.disassemble(true).unwrap();
    assert!(module.function_at(0x5000).is_some());
    // The stub is keyed by its original address internally but the
    // function lives at the effective address.
    assert!(module.function_at(0x6000).is_some());
}

#[test]
fn test_emit_to_file() {
    let data = sample();
    let pipeline = Pipeline::load(&data, 0).unwrap();
    let (ir, _) = pipeline.lift(true).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.ir");
    let mut file = std::fs::File::create(&path).unwrap();
    odis::write_module(&mut file, &ir).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("define @_main {"));
}
