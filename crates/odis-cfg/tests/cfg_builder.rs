//! End-to-end CFG recovery scenarios against the fixture decoder.

mod common;

use common::{disp, image_with_text, FixtureDecoder, MapSymbolizer};
use odis_cfg::{Module, ObjectDisassembler};

/// Check the structural invariants every recovered module must satisfy:
/// disjoint atoms, contiguous text-atom instructions, symmetric edges.
fn assert_invariants(module: &Module) {
    let mut prev_end = None;
    for (_, atom) in module.atoms() {
        assert!(atom.start <= atom.end);
        if let Some(prev) = prev_end {
            assert!(atom.start >= prev, "atoms overlap at {:#x}", atom.start);
        }
        prev_end = Some(atom.end);

        if let Some(insns) = atom.insns() {
            let mut addr = atom.start;
            for insn in insns {
                assert_eq!(insn.addr, addr, "non-contiguous instruction");
                addr += insn.size;
            }
            assert_eq!(addr, atom.end, "instructions do not cover the atom");
        }
        if let Some(bytes) = atom.data() {
            assert_eq!(bytes.len() as u64, atom.end - atom.start);
        }
    }

    for (_, func) in module.functions() {
        for (id, block) in func.blocks() {
            for &succ in &block.succs {
                assert!(
                    func.block(succ).preds.contains(&id),
                    "missing back edge {:#x} -> {:#x}",
                    block.start,
                    func.block(succ).start
                );
            }
            for &pred in &block.preds {
                assert!(
                    func.block(pred).succs.contains(&id),
                    "missing forward edge {:#x} -> {:#x}",
                    func.block(pred).start,
                    block.start
                );
            }
        }
    }
}

#[test]
fn test_linear_block() {
    // mov; add; ret
    let image = image_with_text(0x1000, vec![0x02, 0x03, 0xc3], &[("f", 0x1000)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();

    assert_eq!(module.function_count(), 1);
    let (_, func) = module.functions().next().unwrap();
    assert_eq!(func.len(), 1);
    let entry = func.block(func.entry_block().unwrap());
    assert!(entry.succs.is_empty());

    let atom = module.atom(entry.atom);
    assert_eq!((atom.start, atom.end), (0x1000, 0x1003));
    assert_eq!(atom.insns().unwrap().len(), 3);
    assert_eq!(atom.name.as_deref(), Some("__text"));
    assert_invariants(&module);
}

#[test]
fn test_conditional_branch_with_fallthrough() {
    // 0x1000 cmp; 0x1001 je 0x1005; 0x1003 mov; 0x1004 ret;
    // 0x1005 nop; 0x1006 ret
    let bytes = vec![0x04, 0x74, disp(0x1001, 0x1005), 0x02, 0xc3, 0x01, 0xc3];
    let image = image_with_text(0x1000, bytes, &[("f", 0x1000)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();

    let func = module.func(module.function_at(0x1000).unwrap());
    assert_eq!(func.len(), 3);

    let b0 = func.block(func.block_at(0x1000).unwrap());
    let b1 = func.block_at(0x1003).unwrap();
    let b2 = func.block_at(0x1005).unwrap();

    assert_eq!(
        (module.atom(b0.atom).start, module.atom(b0.atom).end),
        (0x1000, 0x1003)
    );
    let mut succs: Vec<u64> = b0.succs.iter().map(|&s| func.block(s).start).collect();
    succs.sort_unstable();
    assert_eq!(succs, vec![0x1003, 0x1005]);
    assert!(func.block(b1).succs.is_empty());
    assert!(func.block(b2).succs.is_empty());
    assert_invariants(&module);
}

#[test]
fn test_atom_split_across_functions() {
    // One straight run: 15 nops and a ret, with a second function symbol
    // pointing into the middle.
    let mut bytes = vec![0x01; 15];
    bytes.push(0xc3);
    let image = image_with_text(0x1000, bytes, &[("f0", 0x1000), ("f1", 0x1008)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();

    assert_eq!(module.function_count(), 2);

    let f0 = module.func(module.function_at(0x1000).unwrap());
    let f1 = module.func(module.function_at(0x1008).unwrap());

    let lower = module.atom(f0.block(f0.entry_block().unwrap()).atom);
    assert_eq!((lower.start, lower.end), (0x1000, 0x1008));
    assert_eq!(lower.insns().unwrap().len(), 8);
    assert_eq!(lower.name.as_deref(), Some("__text"));

    let upper = module.atom(f1.block(f1.entry_block().unwrap()).atom);
    assert_eq!((upper.start, upper.end), (0x1008, 0x1010));
    assert_eq!(upper.insns().unwrap().len(), 8);
    assert_eq!(upper.name.as_deref(), Some("__text:1008"));
    assert_invariants(&module);
}

#[test]
fn test_split_transfers_pending_successors() {
    // A single function whose trailing jump lands in the middle of its own
    // entry atom: 14 nops, then jmp 0x1008.
    let mut bytes = vec![0x01; 14];
    bytes.push(0xe9);
    bytes.push(disp(0x100e, 0x1008));
    let image = image_with_text(0x1000, bytes, &[("f", 0x1000)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();

    let func = module.func(module.function_at(0x1000).unwrap());
    assert_eq!(func.len(), 2);

    let b0 = func.block_at(0x1000).unwrap();
    let b1 = func.block_at(0x1008).unwrap();

    // The truncated block falls through to the split-off block; the jump,
    // now inside the upper block, loops back to it.
    assert_eq!(func.block(b0).succs, vec![b1]);
    assert_eq!(func.block(b1).succs, vec![b1]);
    assert!(func.block(b1).preds.contains(&b0));
    assert!(func.block(b1).preds.contains(&b1));
    assert_invariants(&module);
}

#[test]
fn test_tail_call_to_external() {
    // jmp to an address the symbolizer classifies as the printf stub.
    let bytes = vec![0xe9, disp(0x2000, 0x2040)];
    let image = image_with_text(0x2000, bytes, &[("f", 0x2000)]);
    let symbolizer = MapSymbolizer::new(&[(0x2040, "printf")]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder).with_symbolizer(&symbolizer);
    let module = dis.build_module(true).unwrap();

    // No intra-function edge to the stub.
    let f = module.func(module.function_at(0x2000).unwrap());
    assert!(f.block(f.entry_block().unwrap()).succs.is_empty());

    // The stub became a named external function with no blocks.
    let printf = module.func(module.function_at(0x2040).unwrap());
    assert_eq!(printf.name.as_deref(), Some("printf"));
    assert!(printf.is_empty());
    assert_invariants(&module);
}

#[test]
fn test_tail_call_fills_accumulators() {
    let bytes = vec![0xe9, disp(0x2000, 0x2040)];
    let image = image_with_text(0x2000, bytes, &[]);
    let symbolizer = MapSymbolizer::new(&[(0x2040, "printf")]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder).with_symbolizer(&symbolizer);

    let mut module = Module::new();
    let func = module.create_function(None, 0x2000);
    let mut call_targets = Vec::new();
    let mut tail_call_targets = Vec::new();
    // Populate regions through the linear driver first.
    let _ = dis.build_module(false).unwrap();
    dis.block_at(
        &mut module,
        func,
        0x2000,
        &mut call_targets,
        &mut tail_call_targets,
    )
    .unwrap();

    assert_eq!(call_targets, vec![0x2040]);
    assert_eq!(tail_call_targets, vec![0x2040]);
}

#[test]
fn test_fixpoint_call_discovery() {
    // f calls 0x1040, which has no symbol; the closure must create it.
    let mut bytes = vec![0u8; 0x42];
    bytes[0x00] = 0xe8;
    bytes[0x01] = disp(0x1000, 0x1040);
    bytes[0x02] = 0xc3;
    for slot in bytes.iter_mut().take(0x40).skip(0x03) {
        *slot = 0x01;
    }
    bytes[0x40] = 0x01;
    bytes[0x41] = 0xc3;
    let image = image_with_text(0x1000, bytes, &[("f", 0x1000)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();

    assert_eq!(module.function_count(), 2);
    let callee = module.func(module.function_at(0x1040).unwrap());
    assert!(callee.name.is_none());
    assert_eq!(callee.len(), 1);
    let entry = module.atom(callee.block(callee.entry_block().unwrap()).atom);
    assert_eq!((entry.start, entry.end), (0x1040, 0x1042));
    assert_invariants(&module);
}

#[test]
fn test_call_falls_through() {
    // The caller's atom continues past the call up to its ret.
    let bytes = vec![0xe8, disp(0x1000, 0x1010), 0x02, 0xc3];
    let image = image_with_text(0x1000, bytes, &[("f", 0x1000)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();

    let f = module.func(module.function_at(0x1000).unwrap());
    let atom = module.atom(f.block(f.entry_block().unwrap()).atom);
    assert_eq!((atom.start, atom.end), (0x1000, 0x1004));
    assert_eq!(atom.insns().unwrap().len(), 3);
}

#[test]
fn test_decode_failure_stops_block() {
    // mov, then garbage: the block keeps the decoded prefix and grows no
    // edges past the failure.
    let bytes = vec![0x02, 0xff, 0xff];
    let image = image_with_text(0x1000, bytes, &[("f", 0x1000)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();

    let f = module.func(module.function_at(0x1000).unwrap());
    assert_eq!(f.len(), 1);
    let block = f.block(f.entry_block().unwrap());
    assert!(block.succs.is_empty());
    let atom = module.atom(block.atom);
    assert_eq!((atom.start, atom.end), (0x1000, 0x1001));
    assert_invariants(&module);
}

#[test]
fn test_fallthrough_stops_at_region_end() {
    // A lone non-terminator at the very end of the region: no fallthrough
    // successor is invented past the section.
    let bytes = vec![0x02];
    let image = image_with_text(0x1000, bytes, &[("f", 0x1000)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();

    let f = module.func(module.function_at(0x1000).unwrap());
    assert_eq!(f.len(), 1);
    assert!(f.block(f.entry_block().unwrap()).succs.is_empty());
}

#[test]
fn test_symbol_outside_regions_skipped() {
    let image = image_with_text(0x1000, vec![0xc3], &[("f", 0x1000), ("ghost", 0x9000)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);
    let module = dis.build_module(true).unwrap();
    assert_eq!(module.function_count(), 1);
    assert!(module.function_at(0x9000).is_none());
}

#[test]
fn test_build_is_idempotent() {
    let bytes = vec![0x04, 0x74, disp(0x1001, 0x1005), 0x02, 0xc3, 0x01, 0xc3];
    let image = image_with_text(0x1000, bytes, &[("f", 0x1000)]);
    let mut dis = ObjectDisassembler::new(&image, &FixtureDecoder);

    let first = dis.build_module(true).unwrap();
    // Second build runs with a warm decode cache; structure must match.
    dis.flush_decode_cache();
    let second = dis.build_module(true).unwrap();

    let shape = |m: &Module| {
        let atoms: Vec<(u64, u64, Option<String>, bool)> = m
            .atoms()
            .map(|(_, a)| (a.start, a.end, a.name.clone(), a.is_text()))
            .collect();
        let mut funcs: Vec<(u64, Option<String>, Vec<(u64, Vec<u64>)>)> = m
            .functions()
            .map(|(_, f)| {
                let mut blocks: Vec<(u64, Vec<u64>)> = f
                    .blocks()
                    .map(|(_, b)| {
                        let mut succs: Vec<u64> =
                            b.succs.iter().map(|&s| f.block(s).start).collect();
                        succs.sort_unstable();
                        (b.start, succs)
                    })
                    .collect();
                blocks.sort_unstable();
                (f.entry, f.name.clone(), blocks)
            })
            .collect();
        funcs.sort_by_key(|(entry, ..)| *entry);
        (atoms, funcs)
    };
    assert_eq!(shape(&first), shape(&second));
    assert_invariants(&second);
}
