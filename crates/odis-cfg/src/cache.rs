//! Frequency-biased cache of raw instruction bytes to decoded instructions.
//!
//! Real binaries repeat the same byte sequences constantly (prologues,
//! epilogues, compiler idioms), and decoding is far more expensive than a
//! prefix search. The cache accumulates `(raw bytes, instruction)` pairs in
//! temporary buffers and periodically rebuilds a small, sorted table of the
//! most frequent sequences; lookups bound their byte window by the longest
//! key retained.

use crate::insn::Insn;

/// Temp-buffer size that triggers a rebuild.
const FLUSH_THRESHOLD: usize = 5000;
/// Number of most-frequent byte sequences kept per rebuild.
const KEEP_RUNS: usize = 2000;

#[derive(Clone, Debug)]
struct CacheEntry {
    raw: Vec<u8>,
    insn: Insn,
}

/// Module-scoped instruction cache. Single-threaded.
#[derive(Debug, Default)]
pub struct DecodeCache {
    /// `(raw bytes, index into temp_values)`, accumulated during
    /// disassembly.
    temp_keys: Vec<(Vec<u8>, u32)>,
    temp_values: Vec<Insn>,
    /// Stable table, sorted lexicographically by raw bytes.
    cached: Vec<CacheEntry>,
    /// Maximum key length in `cached`; bounds lookup windows.
    longest: usize,
}

impl DecodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest cached byte sequence. Callers fetch at most this many bytes
    /// for a lookup window.
    pub fn longest(&self) -> usize {
        self.longest
    }

    pub fn cached_len(&self) -> usize {
        self.cached.len()
    }

    /// Find the cached instruction whose raw bytes prefix `window`.
    ///
    /// Searches for the greatest cached key `<=` the window; it is a hit
    /// iff the window starts with that key. Returns the instruction and
    /// its byte length.
    pub fn lookup(&self, window: &[u8]) -> Option<(&Insn, u64)> {
        if window.is_empty() {
            return None;
        }
        let idx = self.cached.partition_point(|e| e.raw.as_slice() <= window);
        let entry = self.cached.get(idx.checked_sub(1)?)?;
        window
            .starts_with(&entry.raw)
            .then(|| (&entry.insn, entry.raw.len() as u64))
    }

    /// Record a freshly decoded instruction. Triggers a rebuild once the
    /// temp buffers exceed the flush threshold.
    pub fn insert(&mut self, raw: Vec<u8>, insn: Insn) {
        self.temp_keys.push((raw, self.temp_values.len() as u32));
        self.temp_values.push(insn);
        if self.temp_values.len() > FLUSH_THRESHOLD {
            self.flush();
        }
    }

    /// Rebuild the stable table from the temp buffers and the current
    /// table: sort all keys, count duplicate runs, keep the most frequent
    /// ones.
    pub fn flush(&mut self) {
        if self.temp_keys.is_empty() {
            return;
        }

        // Existing entries seed the new counts so hot sequences survive
        // rebuilds.
        for entry in self.cached.drain(..) {
            self.temp_keys
                .push((entry.raw, self.temp_values.len() as u32));
            self.temp_values.push(entry.insn);
        }

        self.temp_keys.sort();

        // Equal keys are now consecutive; count each run.
        let mut runs: Vec<(usize, usize)> = Vec::new(); // (key index, count)
        for (i, (raw, _)) in self.temp_keys.iter().enumerate() {
            match runs.last_mut() {
                Some((start, count)) if self.temp_keys[*start].0 == *raw => *count += 1,
                _ => runs.push((i, 1)),
            }
        }

        runs.sort_by(|a, b| b.1.cmp(&a.1));
        runs.truncate(KEEP_RUNS);

        self.cached = runs
            .iter()
            .map(|&(key_idx, _)| {
                let (raw, value_idx) = &self.temp_keys[key_idx];
                CacheEntry {
                    raw: raw.clone(),
                    insn: self.temp_values[*value_idx as usize].clone(),
                }
            })
            .collect();
        self.cached.sort_by(|a, b| a.raw.cmp(&b.raw));
        self.longest = self.cached.iter().map(|e| e.raw.len()).max().unwrap_or(0);

        self.temp_keys.clear();
        self.temp_values.clear();
    }
}
