use crate::{model::Program, rpc::Condition, utils::to_boxed_str};

use rustc_hash::FxHashSet;

/// A fuzz input as seen by the fuzzer, with everything learned from observing it.
///
/// Cover sets hold the fuzzer's own pc values, so they can be compared with
/// what the fuzzer reports without translation.
#[derive(Debug, Clone)]
pub struct Input {
    /// Signature of the program, unique per input.
    pub sig: Box<str>,
    /// Program text, kept from the first observation.
    pub program: String,
    /// Times this input was observed.
    pub number: u64,
    /// Union of all observed traces.
    pub max_cover: FxHashSet<u64>,
    /// Intersection of all observed traces.
    pub mini_cover: FxHashSet<u64>,
    /// Runtime address of every branch this input reached.
    pub condition_addresses: FxHashSet<u64>,
    /// Untaken arms of those branches, still believed uncovered.
    pub pending: Vec<Condition>,
    traces: u64,
}

impl Input {
    pub fn new(sig: &str, program: &str) -> Self {
        Self {
            sig: to_boxed_str(sig),
            program: program.to_string(),
            number: 0,
            max_cover: FxHashSet::default(),
            mini_cover: FxHashSet::default(),
            condition_addresses: FxHashSet::default(),
            pending: Vec::new(),
            traces: 0,
        }
    }

    pub fn fold_trace<I: IntoIterator<Item = u64>>(&mut self, trace: I) {
        let trace: FxHashSet<u64> = trace.into_iter().collect();
        if self.traces == 0 {
            self.mini_cover = trace.clone();
        } else {
            self.mini_cover.retain(|a| trace.contains(a));
        }
        self.max_cover.extend(trace);
        self.traces += 1;
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Queue `cond` unless the same arm of the same branch is already pending.
    pub fn add_condition(&mut self, cond: Condition) -> bool {
        let dup = self.pending.iter().any(|c| {
            c.condition_address == cond.condition_address
                && c.uncovered_address == cond.uncovered_address
        });
        if !dup {
            self.pending.push(cond);
        }
        !dup
    }

    /// Drop pending conditions whose target got covered by any input.
    pub fn prune_covered(&mut self, program: &Program) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|c| !program.is_covered_address(c.uncovered_address));
        before - self.pending.len()
    }
}
