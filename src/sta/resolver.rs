use super::{WriteSet, WriteSetOracle};
use crate::{
    model::{BlockId, Program},
    rpc::Condition,
};

use std::rc::Rc;

use rustc_hash::FxHashMap;

/// One analysis unit: the oracle and the source files it was computed for.
pub struct AnalysisUnit {
    pub name: Box<str>,
    pub prefixes: Vec<String>,
    pub oracle: Box<dyn WriteSetOracle>,
}

impl AnalysisUnit {
    /// Length of the longest prefix matching `path`.
    fn match_len(&self, path: &str) -> Option<usize> {
        // debug info paths are not always relative to the kernel tree.
        self.prefixes
            .iter()
            .filter(|p| !p.is_empty() && path.contains(p.as_str()))
            .map(|p| p.len())
            .max()
    }
}

/// Memoizing front of the analysis units.
///
/// Results are keyed by the terminal block of the queried block, so every block of
/// a fallthrough chain shares one entry. Analysis results don't change during a
/// run, so entries are never invalidated.
#[derive(Default)]
pub struct WriteSetResolver {
    units: Vec<AnalysisUnit>,
    cache: FxHashMap<(BlockId, usize), WriteSet>,
    hits: u64,
    misses: u64,
}

impl WriteSetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_unit(&mut self, unit: AnalysisUnit) {
        log::debug!("analysis unit {}: {:?}", unit.name, unit.prefixes);
        self.units.push(unit);
    }

    pub fn units(&self) -> usize {
        self.units.len()
    }

    /// Arm index named by a successor flag.
    pub fn branch_index(successor: u32) -> usize {
        match successor {
            1 => 0,
            2 => 1,
            _ => {
                log::warn!("unexpected successor flag {:#x}, using first arm", successor);
                0
            }
        }
    }

    fn select_unit(&self, path: &str) -> Option<&AnalysisUnit> {
        self.units
            .iter()
            .filter_map(|u| u.match_len(path).map(|l| (l, u)))
            .max_by_key(|(l, _)| *l)
            .map(|(_, u)| u)
    }

    pub fn resolve(&mut self, program: &Program, cond: &Condition) -> WriteSet {
        let branch = Self::branch_index(cond.successor);
        self.resolve_at(program, cond.condition_address, branch)
    }

    pub fn resolve_at(&mut self, program: &Program, address: u64, branch: usize) -> WriteSet {
        match program.block_at(address) {
            Some(b) => self.resolve_block(program, b, branch),
            None => {
                log::debug!("condition {:#x} not in program", address);
                WriteSet::Unresolved
            }
        }
    }

    pub fn resolve_block(&mut self, program: &Program, b: BlockId, branch: usize) -> WriteSet {
        let terminal = program.terminal_block(b);
        let key = (terminal, branch);
        if let Some(ws) = self.cache.get(&key) {
            self.hits += 1;
            return ws.clone();
        }

        let f = program.function(program.block(terminal).function);
        if !f.compiled {
            log::debug!("{}: not compiled, no analysis", f.name);
            return WriteSet::Unresolved;
        }
        let ws = match self.select_unit(&f.path) {
            Some(unit) => match unit.oracle.write_set(program, terminal, branch) {
                Some(mods) => WriteSet::Resolved(Rc::from(mods)),
                None => WriteSet::Unresolved,
            },
            None => {
                log::debug!("{}: no analysis unit for '{}'", f.name, f.path);
                return WriteSet::Unresolved;
            }
        };
        self.misses += 1;
        self.cache.insert(key, ws.clone());
        ws
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sta::Classification,
        testing::{fixture, rt, unit, writer, MapOracle},
    };

    #[test]
    fn successor_flags() {
        assert_eq!(WriteSetResolver::branch_index(1), 0);
        assert_eq!(WriteSetResolver::branch_index(2), 1);
        assert_eq!(WriteSetResolver::branch_index(4), 0);
        assert_eq!(WriteSetResolver::branch_index(0), 0);
    }

    #[test]
    fn second_lookup_hits_cache() {
        let fx = fixture();
        let mut oracle = MapOracle::default();
        oracle.answers.insert((fx.b[2], 0), vec![writer(fx.w0, true)]);
        let calls = oracle.calls.clone();
        let mut r = WriteSetResolver::new();
        r.add_unit(unit("loop", "drivers/block/", oracle));

        let cond = Condition {
            condition_address: rt(0x40),
            uncovered_address: rt(0x50),
            successor: 1,
            ..Default::default()
        };
        let first = r.resolve(&fx.program, &cond);
        let second = r.resolve(&fx.program, &cond);
        assert_eq!(calls.get(), 1);
        assert_eq!(first, second);
        assert_eq!(first.classify(), Classification::DependencyWritten);
        assert_eq!((r.hits(), r.misses()), (1, 1));
    }

    #[test]
    fn fallthrough_chain_shares_entry() {
        let fx = fixture();
        let oracle = MapOracle::default();
        let calls = oracle.calls.clone();
        let mut r = WriteSetResolver::new();
        r.add_unit(unit("loop", "drivers/block/", oracle));

        // b0 and b1 fall through into b2.
        let a = r.resolve_block(&fx.program, fx.b[0], 1);
        let b = r.resolve_block(&fx.program, fx.b[1], 1);
        let c = r.resolve_at(&fx.program, rt(0x44), 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(r.cached(), 1);
        // unanswered branches are cached as unresolved too.
        assert_eq!(a, WriteSet::Unresolved);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn explicit_empty_differs_from_unresolved() {
        let fx = fixture();
        let mut oracle = MapOracle::default();
        oracle.answers.insert((fx.b[2], 1), Vec::new());
        let mut r = WriteSetResolver::new();
        r.add_unit(unit("loop", "drivers/block/", oracle));
        let ws = r.resolve_block(&fx.program, fx.b[2], 1);
        assert_eq!(ws.classify(), Classification::DependencyUnwritten);
        let ws = r.resolve_block(&fx.program, fx.b[2], 0);
        assert_eq!(ws.classify(), Classification::InputRelated);
    }

    #[test]
    fn unmatched_path_is_not_cached() {
        let fx = fixture();
        let oracle = MapOracle::default();
        let calls = oracle.calls.clone();
        let mut r = WriteSetResolver::new();
        r.add_unit(unit("ext4", "fs/ext4/", oracle));
        assert_eq!(r.resolve_block(&fx.program, fx.b[2], 0), WriteSet::Unresolved);
        assert_eq!(r.resolve_at(&fx.program, 0xdead, 0), WriteSet::Unresolved);
        assert_eq!(calls.get(), 0);
        assert_eq!(r.cached(), 0);
    }

    #[test]
    fn longest_prefix_wins() {
        let fx = fixture();
        let wide = MapOracle::default();
        let wide_calls = wide.calls.clone();
        let mut narrow = MapOracle::default();
        narrow.answers.insert((fx.b[2], 0), vec![writer(fx.w0, false)]);
        let mut r = WriteSetResolver::new();
        r.add_unit(unit("drivers", "drivers/", wide));
        r.add_unit(unit("loop", "drivers/block/", narrow));
        let ws = r.resolve_block(&fx.program, fx.b[2], 0);
        assert_eq!(ws.writers().len(), 1);
        assert_eq!(wide_calls.get(), 0);
    }

    #[test]
    fn assembly_functions_are_unresolved() {
        let mut fx = fixture();
        let f = fx
            .program
            .add_function("drivers/block/loop_asm.S", "lo_fast", false);
        let b = fx.program.add_block(f, "entry", Some(0x9000));
        let oracle = MapOracle::default();
        let calls = oracle.calls.clone();
        let mut r = WriteSetResolver::new();
        r.add_unit(unit("loop", "drivers/block/", oracle));
        assert_eq!(r.resolve_block(&fx.program, b, 0), WriteSet::Unresolved);
        assert_eq!(calls.get(), 0);
        assert_eq!(r.cached(), 0);
    }
}
