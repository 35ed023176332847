use super::input::Input;
use crate::{
    model::{InputId, Program},
    utils::to_boxed_str,
};

use rustc_hash::FxHashMap;

/// Every input seen during the session, deduplicated by signature.
///
/// Entries are never removed.
#[derive(Debug, Default)]
pub struct Ledger {
    inputs: Vec<Input>,
    by_sig: FxHashMap<Box<str>, InputId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more observation of `sig`, creating the entry the first time.
    ///
    /// Returns the id and whether the entry is new.
    pub fn register_or_update(&mut self, sig: &str, program: &str) -> (InputId, bool) {
        let (id, new) = match self.by_sig.get(sig) {
            Some(&id) => (id, false),
            None => {
                let id = InputId(self.inputs.len() as u32);
                self.inputs.push(Input::new(sig, program));
                self.by_sig.insert(to_boxed_str(sig), id);
                (id, true)
            }
        };
        self.inputs[id.index()].number += 1;
        (id, new)
    }

    pub fn find(&self, sig: &str) -> Option<InputId> {
        self.by_sig.get(sig).copied()
    }

    pub fn get(&self, id: InputId) -> &Input {
        &self.inputs[id.index()]
    }

    pub fn get_mut(&mut self, id: InputId) -> &mut Input {
        &mut self.inputs[id.index()]
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InputId, &Input)> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, input)| (InputId(i as u32), input))
    }

    /// Coverage is shared, so one input may satisfy the conditions of all others.
    pub fn prune_all(&mut self, program: &Program) -> usize {
        self.inputs
            .iter_mut()
            .map(|input| input.prune_covered(program))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::CoverKind,
        rpc::Condition,
        testing::{fixture, rt},
    };

    #[test]
    fn register_is_idempotent_on_signature() {
        let mut l = Ledger::new();
        let (a, new) = l.register_or_update("sig-a", "open()");
        assert!(new);
        let (b, new) = l.register_or_update("sig-a", "changed()");
        assert!(!new);
        assert_eq!(a, b);
        assert_eq!(l.get(a).number, 2);
        assert_eq!(l.get(a).program, "open()");
        let (c, _) = l.register_or_update("sig-b", "close()");
        assert_ne!(a, c);
        assert_eq!(l.len(), 2);
        assert_eq!(l.find("sig-b"), Some(c));
        assert_eq!(l.find("sig-c"), None);
    }

    #[test]
    fn covered_targets_are_pruned_everywhere() {
        let mut fx = fixture();
        let mut l = Ledger::new();
        let (a, _) = l.register_or_update("a", "");
        let (b, _) = l.register_or_update("b", "");
        for &id in [a, b].iter() {
            l.get_mut(id).add_condition(Condition {
                condition_address: rt(0x40),
                uncovered_address: rt(0x50),
                successor: 1,
                ..Default::default()
            });
        }
        l.get_mut(b).add_condition(Condition {
            condition_address: rt(0x40),
            uncovered_address: rt(0x30),
            successor: 2,
            ..Default::default()
        });

        fx.program.update(fx.b[3], CoverKind::Covered, Some(a));
        assert_eq!(l.prune_all(&fx.program), 2);
        assert!(!l.get(a).has_pending());
        assert_eq!(l.get(b).pending.len(), 1);
        for (_, input) in l.iter() {
            for c in input.pending.iter() {
                assert!(!fx.program.is_covered_address(c.uncovered_address));
            }
        }
    }
}
