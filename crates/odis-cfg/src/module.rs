//! Recovered module: atoms, functions, basic blocks.
//!
//! The module owns atoms and functions in index arenas; blocks reference
//! their backing atom by id and hold edges as block ids within the same
//! function. Atoms are created and split, never deleted.

use std::collections::BTreeMap;
use std::ops::Bound;

use rustc_hash::FxHashMap;

use crate::insn::Insn;
use crate::{CfgError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AtomId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// One decoded instruction pinned at an address inside a text atom.
#[derive(Clone, Debug)]
pub struct DecodedInsn {
    pub addr: u64,
    pub size: u64,
    pub insn: Insn,
}

impl DecodedInsn {
    pub fn next_addr(&self) -> u64 {
        self.addr + self.size
    }
}

#[derive(Clone, Debug)]
enum AtomKind {
    Text { insns: Vec<DecodedInsn> },
    Data { bytes: Vec<u8> },
}

/// A contiguous, homogeneous `[start, end)` range of a loaded section.
#[derive(Clone, Debug)]
pub struct Atom {
    pub start: u64,
    /// One past the last covered address.
    pub end: u64,
    /// Section name by default; `section:hexaddr` after a split.
    pub name: Option<String>,
    kind: AtomKind,
}

impl Atom {
    pub fn is_text(&self) -> bool {
        matches!(self.kind, AtomKind::Text { .. })
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, AtomKind::Data { .. })
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Decoded instructions of a text atom.
    pub fn insns(&self) -> Option<&[DecodedInsn]> {
        match &self.kind {
            AtomKind::Text { insns } => Some(insns),
            AtomKind::Data { .. } => None,
        }
    }

    /// Bytes of a data atom.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.kind {
            AtomKind::Text { .. } => None,
            AtomKind::Data { bytes } => Some(bytes),
        }
    }

    pub fn last_insn(&self) -> Option<&DecodedInsn> {
        self.insns().and_then(<[_]>::last)
    }
}

/// A basic block backed by exactly one text atom.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub atom: AtomId,
    pub start: u64,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

/// A recovered function: entry address, blocks, optional name.
#[derive(Clone, Debug, Default)]
pub struct Function {
    pub name: Option<String>,
    pub entry: u64,
    blocks: Vec<BasicBlock>,
    by_addr: FxHashMap<u64, BlockId>,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }

    /// Block starting at `addr`, if one exists.
    pub fn block_at(&self, addr: u64) -> Option<BlockId> {
        self.by_addr.get(&addr).copied()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.block_at(self.entry)
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId(i as u32), b))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// The recovered module.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Effective entrypoint, when the image provides one.
    pub entry: Option<u64>,
    atoms: Vec<Atom>,
    /// Atom ids keyed by start address.
    atom_starts: BTreeMap<u64, AtomId>,
    funcs: Vec<Function>,
    func_entries: FxHashMap<u64, FuncId>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn atom(&self, id: AtomId) -> &Atom {
        &self.atoms[id.0 as usize]
    }

    /// Atoms in address order.
    pub fn atoms(&self) -> impl Iterator<Item = (AtomId, &Atom)> {
        self.atom_starts
            .values()
            .map(|&id| (id, &self.atoms[id.0 as usize]))
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    /// Create an empty text atom starting at `start`; it grows as
    /// instructions are pushed.
    pub fn create_text_atom(&mut self, start: u64, name: Option<String>) -> AtomId {
        self.register_atom(Atom {
            start,
            end: start,
            name,
            kind: AtomKind::Text { insns: Vec::new() },
        })
    }

    /// Create an empty data atom starting at `start`; it grows as bytes
    /// are pushed.
    pub fn create_data_atom(&mut self, start: u64, name: Option<String>) -> AtomId {
        self.register_atom(Atom {
            start,
            end: start,
            name,
            kind: AtomKind::Data { bytes: Vec::new() },
        })
    }

    fn register_atom(&mut self, atom: Atom) -> AtomId {
        let id = AtomId(self.atoms.len() as u32);
        let prev = self.atom_starts.insert(atom.start, id);
        debug_assert!(prev.is_none(), "atom already starts at {:#x}", atom.start);
        self.atoms.push(atom);
        id
    }

    /// Append a decoded instruction to a text atom. Instructions must be
    /// contiguous: `insn.addr` equals the atom's current end.
    pub fn push_insn(&mut self, id: AtomId, insn: DecodedInsn) {
        let atom = &mut self.atoms[id.0 as usize];
        debug_assert!(atom.end == insn.addr, "non-contiguous instruction push");
        atom.end = insn.next_addr();
        match &mut atom.kind {
            AtomKind::Text { insns } => insns.push(insn),
            AtomKind::Data { .. } => unreachable!("instruction pushed into data atom"),
        }
    }

    /// Append bytes to a data atom.
    pub fn push_data(&mut self, id: AtomId, bytes: &[u8]) {
        let atom = &mut self.atoms[id.0 as usize];
        atom.end += bytes.len() as u64;
        match &mut atom.kind {
            AtomKind::Text { .. } => unreachable!("data pushed into text atom"),
            AtomKind::Data { bytes: dst } => dst.extend_from_slice(bytes),
        }
    }

    /// Atom containing `addr`, if any.
    pub fn atom_containing(&self, addr: u64) -> Option<AtomId> {
        let (_, &id) = self.atom_starts.range(..=addr).next_back()?;
        self.atoms[id.0 as usize].contains(addr).then_some(id)
    }

    /// First atom starting strictly after `addr`.
    pub fn first_atom_after(&self, addr: u64) -> Option<AtomId> {
        self.atom_starts
            .range((Bound::Excluded(addr), Bound::Unbounded))
            .next()
            .map(|(_, &id)| id)
    }

    /// Split a text atom at `at`, truncating it to `[start, at)` and
    /// returning a new atom covering `[at, end)`. The instruction list is
    /// partitioned at the unique instruction whose address is `at`; if no
    /// such instruction exists the split fails.
    pub fn split_text_atom(&mut self, id: AtomId, at: u64) -> Result<AtomId> {
        let atom = &mut self.atoms[id.0 as usize];
        if !(atom.start < at && at < atom.end) {
            return Err(CfgError::MidInstructionSplit(at));
        }
        let insns = match &mut atom.kind {
            AtomKind::Text { insns } => insns,
            AtomKind::Data { .. } => return Err(CfgError::SplitDataAtom(at)),
        };
        let idx = insns.partition_point(|i| i.addr < at);
        if insns.get(idx).map(|i| i.addr) != Some(at) {
            return Err(CfgError::MidInstructionSplit(at));
        }
        let upper_insns = insns.split_off(idx);
        let old_end = atom.end;
        atom.end = at;
        // `section` or `section:deadbeef` both refine to `section:at`.
        let base = atom
            .name
            .as_deref()
            .map(|n| n.rsplit_once(':').map_or(n, |(b, _)| b))
            .unwrap_or("");
        let name = format!("{base}:{at:x}");
        Ok(self.register_atom(Atom {
            start: at,
            end: old_end,
            name: Some(name),
            kind: AtomKind::Text { insns: upper_insns },
        }))
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id.0 as usize]
    }

    /// Functions in creation order.
    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.funcs
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    pub fn function_count(&self) -> usize {
        self.funcs.len()
    }

    /// Function whose entry address is `entry`, if any.
    pub fn function_at(&self, entry: u64) -> Option<FuncId> {
        self.func_entries.get(&entry).copied()
    }

    /// Create a function at `entry`. At most one function may exist per
    /// entry address; callers check `function_at` first.
    pub fn create_function(&mut self, name: Option<String>, entry: u64) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        let prev = self.func_entries.insert(entry, id);
        debug_assert!(prev.is_none(), "function already exists at {entry:#x}");
        self.funcs.push(Function {
            name,
            entry,
            blocks: Vec::new(),
            by_addr: FxHashMap::default(),
        });
        id
    }

    /// Create a basic block in `func` backed by `atom`.
    pub fn create_block(&mut self, func: FuncId, atom: AtomId) -> BlockId {
        let start = self.atoms[atom.0 as usize].start;
        let f = &mut self.funcs[func.0 as usize];
        let id = BlockId(f.blocks.len() as u32);
        f.blocks.push(BasicBlock {
            atom,
            start,
            preds: Vec::new(),
            succs: Vec::new(),
        });
        f.by_addr.insert(start, id);
        id
    }

    /// Record a `from -> to` edge inside `func`, both directions.
    pub fn add_edge(&mut self, func: FuncId, from: BlockId, to: BlockId) {
        let f = &mut self.funcs[func.0 as usize];
        f.block_mut(from).succs.push(to);
        f.block_mut(to).preds.push(from);
    }
}
