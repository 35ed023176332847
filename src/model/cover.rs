//! Coverage state transitions and impact metrics over the program graph.
use super::{BlockId, CoverKind, InputId, Program};
use crate::{
    addr::{AddrError, AddressTranslator},
    fuzz::input::Input,
    rpc::Condition,
    utils::unix_secs,
};

use std::collections::VecDeque;

use bv::{BitVec, Bits, BitsMut};
use rustc_hash::{FxHashMap, FxHashSet};

/// Parse a trace of the form `[16 32 48]` into the addresses it lists.
///
/// Malformed tokens are logged and skipped.
pub fn parse_trace(raw: &str) -> Vec<u64> {
    let body = raw.trim().trim_start_matches('[').trim_end_matches(']');
    body.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .filter_map(|t| match t.parse::<u64>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                log::warn!("bad trace token: '{}'", t);
                None
            }
        })
        .collect()
}

impl Program {
    /// Raise the state of `b` to `kind`.
    ///
    /// Returns whether the state changed. A request below the current state is
    /// rejected. Covering a block raises its successors that are still
    /// outside to uncovered.
    pub fn update(&mut self, b: BlockId, kind: CoverKind, input: Option<InputId>) -> bool {
        if kind == CoverKind::Covered {
            if let Some(id) = input {
                *self.blocks[b.index()].inputs.entry(id).or_insert(0) += 1;
            }
        }

        let cur = self.blocks[b.index()].state;
        if kind < cur {
            log::error!(
                "block {} asked to go from {} back to {}, ignored",
                self.blocks[b.index()].name,
                cur,
                kind
            );
            return false;
        }
        if kind == cur {
            return false;
        }

        let blk = &mut self.blocks[b.index()];
        blk.state = kind;
        for &i in blk.instructions.iter() {
            let inst = &mut self.instructions[i.index()];
            if inst.state < kind {
                inst.state = kind;
            }
        }
        let f = &mut self.functions[blk.function.index()];
        if f.state < kind {
            f.state = kind;
        }

        if kind == CoverKind::Covered {
            f.covered_blocks += 1;
            blk.last_input = input;
            if blk.trace_pc_address.is_some() {
                self.covered_blocks += 1;
            }
            let succs = self.blocks[b.index()].successors.clone();
            for s in succs {
                if self.blocks[s.index()].state == CoverKind::Outside {
                    self.update(s, CoverKind::Uncovered, None);
                }
            }
        }
        true
    }

    /// Apply one observation of `id`, given as runtime addresses with the index of
    /// the call that reached them.
    ///
    /// Returns each distinct block covered by this observation once, together
    /// with the first call index that reached it.
    pub fn ingest_addresses(&mut self, id: InputId, trace: &[(u64, u32)]) -> Vec<(BlockId, u32)> {
        let now = unix_secs();
        let mut seen = FxHashSet::default();
        let mut covered = Vec::new();
        for &(addr, idx) in trace {
            self.first_cover.entry(addr).or_insert(now);
            match self.block_at(addr) {
                Some(b) => {
                    if seen.insert(b) {
                        self.update(b, CoverKind::Covered, Some(id));
                        covered.push((b, idx));
                    }
                }
                None => log::debug!("address {:#x} not in program", addr),
            }
        }
        covered
    }

    /// Fold a raw trace of fuzzer pcs into `input` and the graph.
    pub fn ingest_coverage_trace(
        &mut self,
        tr: &AddressTranslator,
        input: &mut Input,
        id: InputId,
        raw: &str,
    ) -> Result<Vec<(BlockId, u32)>, AddrError> {
        let pcs = parse_trace(raw);
        let mut trace = Vec::with_capacity(pcs.len());
        for &pc in pcs.iter() {
            trace.push((tr.to_runtime(pc)?, 0));
        }
        input.fold_trace(pcs);
        Ok(self.ingest_addresses(id, &trace))
    }

    /// Record the branches reached by `covered` in `input` and derive a pending
    /// condition for each arm not taken yet.
    ///
    /// Returns the number of new conditions.
    pub fn infer_conditions(&self, input: &mut Input, covered: &[(BlockId, u32)]) -> usize {
        let reached_by: FxHashMap<BlockId, u32> = covered.iter().copied().collect();
        let mut terminals = FxHashSet::default();
        let mut added = 0;
        for &(b, idx) in covered {
            let t = self.terminal_block(b);
            let idx = reached_by.get(&t).copied().unwrap_or(idx);
            if !terminals.insert(t) {
                continue;
            }
            let blk = self.block(t);
            if blk.successors.len() < 2 {
                continue;
            }
            let cond_addr = match self.block_address(t) {
                Some(a) => a,
                None => continue,
            };
            input.condition_addresses.insert(cond_addr);

            // the successor flag only names the two arms of a branch.
            for (i, &s) in blk.successors.iter().take(2).enumerate() {
                if self.block(s).state == CoverKind::Covered {
                    continue;
                }
                let target = match self.block_address(s) {
                    Some(a) => a,
                    None => continue,
                };
                let right_branch_address = self
                    .arrival_uncovered_blocks(s)
                    .into_iter()
                    .filter_map(|r| self.block_address(r))
                    .collect();
                let cond = Condition {
                    condition_address: cond_addr,
                    uncovered_address: target,
                    idx,
                    successor: 1 << i,
                    right_branch_address,
                };
                if input.add_condition(cond) {
                    added += 1;
                }
            }
        }
        added
    }

    /// Blocks of the same function reachable from `start` without passing a
    /// covered block, `start` included if it is not covered.
    pub fn arrival_uncovered_blocks(&self, start: BlockId) -> Vec<BlockId> {
        let cfg = self.cfg(self.block(start).function);
        let mut out = Vec::new();
        let start_node = match cfg.node(start) {
            Some(n) => n,
            None => return out,
        };

        let mut visited: BitVec = BitVec::new_fill(false, cfg.len() as u64);
        let mut queue = VecDeque::new();
        visited.set_bit(start_node.index() as u64, true);
        queue.push_back(start_node);
        while let Some(n) = queue.pop_front() {
            let b = cfg.block(n);
            if self.block(b).state != CoverKind::Covered {
                out.push(b);
            }
            for s in cfg.successors(n) {
                let i = s.index() as u64;
                if visited.get_bit(i) || self.block(cfg.block(s)).state == CoverKind::Covered {
                    continue;
                }
                visited.set_bit(i, true);
                queue.push_back(s);
            }
        }
        out
    }

    pub fn arrival_uncovered_count(&self, b: BlockId) -> u32 {
        self.arrival_uncovered_blocks(b).len() as u32
    }

    /// Uncovered instructions in the blocks `b` dominates, `b` included.
    pub fn dominator_uncovered_count(&self, b: BlockId) -> u32 {
        let cfg = self.cfg(self.block(b).function);
        match cfg.node(b) {
            Some(n) => cfg
                .dominated(n)
                .into_iter()
                .map(|d| self.uncovered_instructions(cfg.block(d)))
                .sum(),
            None => 0,
        }
    }

    pub fn uncovered_instructions(&self, b: BlockId) -> u32 {
        self.block(b)
            .instructions
            .iter()
            .filter(|&&i| self.instruction(i).state != CoverKind::Covered)
            .count() as u32
    }
}
