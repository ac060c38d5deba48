//! Recursive-disassembly driver: atoms, blocks, functions.
//!
//! Discovery of one function entry runs a worklist over block start
//! addresses: adopt or split an existing atom, or disassemble linearly
//! until a terminator, a decode failure, the region end, or the next
//! existing atom. Successor addresses feed the worklist; statically
//! evaluated call targets are harvested for the module-level closure.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use crate::cache::DecodeCache;
use crate::image::{LoadedImage, SymbolClass};
use crate::insn::{DecodeStep, InsnDecoder, Symbolizer};
use crate::module::{AtomId, BlockId, DecodedInsn, FuncId, Module};
use crate::region::{Region, RegionMap};
use crate::{CfgError, Result};

/// Decode-traffic counters for a build.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisasmStats {
    /// Instructions decoded by the backend.
    pub translated: u64,
    /// Instructions served from the decode cache.
    pub uniqued: u64,
}

/// Per-address scratch record, alive for one `block_at` call.
#[derive(Default)]
struct BlockScratch {
    atom: Option<AtomId>,
    block: Option<BlockId>,
    succ_addrs: Vec<u64>,
}

/// Recovers a [`Module`] from a loaded image.
///
/// Single-threaded and non-reentrant; the decode cache and region map are
/// scoped to this value and survive across builds.
pub struct ObjectDisassembler<'a, D: InsnDecoder> {
    image: &'a LoadedImage,
    decoder: &'a D,
    symbolizer: Option<&'a dyn Symbolizer>,
    regions: RegionMap,
    cache: DecodeCache,
    stats: DisasmStats,
}

impl<'a, D: InsnDecoder> ObjectDisassembler<'a, D> {
    pub fn new(image: &'a LoadedImage, decoder: &'a D) -> Self {
        Self {
            image,
            decoder,
            symbolizer: None,
            regions: RegionMap::new(),
            cache: DecodeCache::new(),
            stats: DisasmStats::default(),
        }
    }

    pub fn with_symbolizer(mut self, symbolizer: &'a dyn Symbolizer) -> Self {
        self.symbolizer = Some(symbolizer);
        self
    }

    pub fn stats(&self) -> DisasmStats {
        self.stats
    }

    /// Force a decode-cache rebuild so pending entries become visible to
    /// lookups.
    pub fn flush_decode_cache(&mut self) {
        self.cache.flush();
    }

    /// Build a module from the image. With `with_cfg`, functions are
    /// recovered from symbol-table entries and the call-target closure;
    /// without it, a linear sweep produces section atoms and no edges.
    pub fn build_module(&mut self, with_cfg: bool) -> Result<Module> {
        let mut module = Module::new();
        module.entry = self.image.entrypoint;
        self.populate_regions();
        if with_cfg {
            self.build_cfg(&mut module)?;
        } else {
            self.build_section_atoms(&mut module);
        }
        Ok(module)
    }

    /// Populate the region map from text sections, once.
    fn populate_regions(&mut self) {
        if !self.regions.is_empty() {
            return;
        }
        for section in &self.image.sections {
            if !section.is_text() {
                continue;
            }
            let Some(bytes) = &section.bytes else {
                continue;
            };
            if bytes.len() as u64 != section.size || section.size == 0 {
                continue;
            }
            let base = self.image.effective_addr(section.addr);
            trace!(name = %section.name, "text region at {base:#x}");
            self.regions
                .insert(Region::new(section.name.clone(), base, bytes.clone()));
        }
    }

    /// Linear sweep: one text atom per contiguous decodable run, one data
    /// atom per invalid run, one data atom per data section.
    fn build_section_atoms(&self, module: &mut Module) {
        for section in &self.image.sections {
            if !section.is_text() && !section.is_data() {
                continue;
            }
            let Some(bytes) = &section.bytes else {
                continue;
            };
            if bytes.len() as u64 != section.size || section.size == 0 {
                continue;
            }
            let start = self.image.effective_addr(section.addr);

            if section.is_data() {
                let id = module.create_data_atom(start, Some(section.name.clone()));
                module.push_data(id, bytes);
                continue;
            }

            let mut text: Option<AtomId> = None;
            let mut invalid: Option<AtomId> = None;
            let mut index = 0usize;
            while index < bytes.len() {
                let addr = start + index as u64;
                match self.decoder.decode(&bytes[index..], addr) {
                    DecodeStep::Insn(insn, size) => {
                        let id = *text.get_or_insert_with(|| {
                            invalid = None;
                            module.create_text_atom(addr, Some(section.name.clone()))
                        });
                        module.push_insn(id, DecodedInsn { addr, size, insn });
                        index += size as usize;
                    }
                    DecodeStep::Invalid { skip } => {
                        debug_assert!(skip > 0, "decoder consumed no bytes");
                        let skip = (skip.max(1) as usize).min(bytes.len() - index);
                        let id = *invalid.get_or_insert_with(|| {
                            text = None;
                            module.create_data_atom(addr, None)
                        });
                        module.push_data(id, &bytes[index..index + skip]);
                        index += skip;
                    }
                }
            }
        }
    }

    /// Seed functions from the symbol table, then close over discovered
    /// call targets until no new ones appear.
    fn build_cfg(&mut self, module: &mut Module) -> Result<()> {
        let mut call_targets = Vec::new();
        let mut tail_call_targets = Vec::new();

        for symbol in &self.image.symbols {
            if symbol.class != SymbolClass::Function {
                continue;
            }
            let entry = self.image.effective_addr(symbol.addr);
            if self.regions.region_for(entry).is_none() {
                trace!(name = %symbol.name, "function symbol at {entry:#x} outside any region");
                continue;
            }
            self.create_function(module, entry, &mut call_targets, &mut tail_call_targets)?;
        }

        dedup_addresses(&mut call_targets);
        dedup_addresses(&mut tail_call_targets);

        while !call_targets.is_empty() {
            let mut new_targets = Vec::new();
            for &target in &call_targets {
                // External targets need no backing region; anything else
                // outside the region map is undiscoverable.
                let external = self
                    .symbolizer
                    .map_or(false, |s| {
                        s.external_function_at(self.image.original_addr(target)).is_some()
                    });
                if !external && self.regions.region_for(target).is_none() {
                    trace!("call target {target:#x} outside any region");
                    continue;
                }
                self.create_function(module, target, &mut new_targets, &mut tail_call_targets)?;
            }
            dedup_addresses(&mut new_targets);
            // Only genuinely new entries keep the closure going.
            new_targets.retain(|addr| module.function_at(*addr).is_none());
            call_targets = new_targets;
        }

        Ok(())
    }

    /// Bind an entry address to a function: external functions get their
    /// import name and no CFG recovery, known entries are reused, anything
    /// else is disassembled.
    pub fn create_function(
        &mut self,
        module: &mut Module,
        entry: u64,
        call_targets: &mut Vec<u64>,
        tail_call_targets: &mut Vec<u64>,
    ) -> Result<FuncId> {
        let external = self
            .symbolizer
            .and_then(|s| s.external_function_at(self.image.original_addr(entry)))
            .map(str::to_string);
        if let Some(name) = external {
            if let Some(func) = module.function_at(entry) {
                return Ok(func);
            }
            debug!(name = %name, "external function at {entry:#x}");
            return Ok(module.create_function(Some(name), entry));
        }

        if let Some(func) = module.function_at(entry) {
            return Ok(func);
        }

        let func = module.create_function(None, entry);
        match self.block_at(module, func, entry, call_targets, tail_call_targets) {
            Ok(_) => {}
            Err(CfgError::NoBlockAt(addr)) => {
                // Nothing decodable at the entry; keep the empty function.
                warn!("function entry at {addr:#x} not disassemblable");
            }
            Err(err) => return Err(err),
        }
        Ok(func)
    }

    /// Recover the basic block containing `begin` inside `func`, together
    /// with everything reachable from it intra-procedurally.
    ///
    /// Phase 1 discovers and splits atoms along a deduplicating FIFO
    /// worklist; phase 2 materializes blocks; phase 3 wires edges.
    pub fn block_at(
        &mut self,
        module: &mut Module,
        func: FuncId,
        begin: u64,
        call_targets: &mut Vec<u64>,
        tail_call_targets: &mut Vec<u64>,
    ) -> Result<BlockId> {
        let mut scratch: FxHashMap<u64, BlockScratch> = FxHashMap::default();
        let mut worklist: Vec<u64> = vec![begin];
        let mut queued: FxHashSet<u64> = FxHashSet::default();
        queued.insert(begin);

        debug!("recovering blocks at {begin:#x}");

        let mut wi = 0;
        while wi < worklist.len() {
            let block_start = worklist[wi];
            wi += 1;
            scratch.entry(block_start).or_default();
            let mut failed = false;

            let atom = if let Some(found) = module.atom_containing(block_start) {
                if module.atom(found).is_data() {
                    warn!("target {block_start:#x} inside a data atom, skipping");
                    continue;
                }
                if module.atom(found).start == block_start {
                    trace!("adopting existing atom at {block_start:#x}");
                    Some(found)
                } else {
                    trace!(
                        "splitting atom at {:#x} at target {block_start:#x}",
                        module.atom(found).start
                    );
                    let upper = module.split_text_atom(found, block_start)?;
                    let lower_start = module.atom(found).start;
                    // The truncated block now falls through to the new
                    // one; its pending successors move over.
                    let moved = match scratch.get_mut(&lower_start) {
                        Some(prev) if prev.atom.is_some() => {
                            let moved = std::mem::take(&mut prev.succ_addrs);
                            prev.succ_addrs.push(block_start);
                            Some(moved)
                        }
                        _ => None,
                    };
                    if let Some(moved) = moved {
                        scratch
                            .get_mut(&block_start)
                            .expect("scratch entry created above")
                            .succ_addrs = moved;
                    }
                    Some(upper)
                }
            } else {
                let Some(region) = self.regions.region_for(block_start) else {
                    warn!("no region backs {block_start:#x}, skipping");
                    continue;
                };
                // Stop before the next atom so atoms stay disjoint.
                let mut end_limit = region.end();
                if let Some(next) = module.first_atom_after(block_start) {
                    end_limit = end_limit.min(module.atom(next).start);
                }
                trace!("linear disassembly {block_start:#x}..{end_limit:#x}");

                let mut text: Option<AtomId> = None;
                let mut addr = block_start;
                while addr < end_limit {
                    let avail = (end_limit - addr) as usize;
                    let hit = self
                        .cache
                        .lookup(region.window(addr, self.cache.longest().min(avail)))
                        .map(|(insn, size)| (insn.clone(), size));
                    let (insn, size) = match hit {
                        Some(found) => {
                            self.stats.uniqued += 1;
                            found
                        }
                        None => match self.decoder.decode(region.window(addr, avail), addr) {
                            DecodeStep::Insn(insn, size) => {
                                self.stats.translated += 1;
                                self.cache
                                    .insert(region.window(addr, size as usize).to_vec(), insn.clone());
                                (insn, size)
                            }
                            DecodeStep::Invalid { .. } => {
                                debug!("disassembly failed at {addr:#x}");
                                failed = true;
                                break;
                            }
                        },
                    };

                    let id = *text.get_or_insert_with(|| {
                        module.create_text_atom(addr, Some(region.name().to_string()))
                    });
                    module.push_insn(
                        id,
                        DecodedInsn {
                            addr,
                            size,
                            insn: insn.clone(),
                        },
                    );

                    if let Some(target) = insn.branch_target(addr, size) {
                        trace!("static branch target {target:#x}");
                        if insn.is_call() {
                            call_targets.push(target);
                        }
                    }

                    addr += size;
                    if insn.is_terminator() {
                        break;
                    }
                }
                text
            };

            let entry = scratch
                .get_mut(&block_start)
                .expect("scratch entry created above");
            entry.atom = atom;
            let Some(atom_id) = atom else {
                continue;
            };

            if failed {
                // No fallthrough or branch edges past a decode failure.
                continue;
            }

            let (atom_start, fall, last) = {
                let a = module.atom(atom_id);
                (a.start, a.end, a.last_insn().cloned())
            };
            let Some(last) = last else {
                continue;
            };
            let region_end = self
                .regions
                .region_for(atom_start)
                .map(|r| r.end())
                .unwrap_or(fall);

            if (last.insn.is_conditional_branch() || !last.insn.is_terminator())
                && fall < region_end
            {
                scratch
                    .get_mut(&block_start)
                    .expect("scratch entry created above")
                    .succ_addrs
                    .push(fall);
                if queued.insert(fall) {
                    worklist.push(fall);
                }
            }

            if last.insn.is_branch() {
                if let Some(target) = last.insn.branch_target(last.addr, last.size) {
                    let external = self
                        .symbolizer
                        .and_then(|s| s.external_function_at(self.image.original_addr(target)))
                        .is_some();
                    if external {
                        trace!("tail call to external function at {target:#x}");
                        tail_call_targets.push(target);
                        call_targets.push(target);
                    } else {
                        scratch
                            .get_mut(&block_start)
                            .expect("scratch entry created above")
                            .succ_addrs
                            .push(target);
                        if queued.insert(target) {
                            worklist.push(target);
                        }
                    }
                }
            }
        }

        // Phase 2: materialize blocks, reusing any the function already
        // has at that address.
        for &addr in &worklist {
            let info = scratch.get_mut(&addr).expect("every queued address has scratch");
            let Some(atom_id) = info.atom else {
                continue;
            };
            let block = match module.func(func).block_at(addr) {
                Some(existing) => existing,
                None => module.create_block(func, atom_id),
            };
            info.block = Some(block);
        }

        // Phase 3: wire edges both ways.
        for &addr in &worklist {
            let (block, mut succs) = {
                let info = &scratch[&addr];
                (info.block, info.succ_addrs.clone())
            };
            let Some(block) = block else {
                continue;
            };
            dedup_addresses(&mut succs);
            for succ_addr in succs {
                let Some(succ) = scratch.get(&succ_addr).and_then(|i| i.block) else {
                    continue;
                };
                module.add_edge(func, block, succ);
            }
        }

        scratch
            .get(&begin)
            .and_then(|info| info.block)
            .ok_or(CfgError::NoBlockAt(begin))
    }
}

/// Sort and deduplicate an address vector in place.
fn dedup_addresses(addrs: &mut Vec<u64>) {
    addrs.sort_unstable();
    addrs.dedup();
}
