//! Shared fixtures and doubles for unit tests.
//!
//! `lo_ioctl` has the following blocks, named by the fuzzer pc of their trace
//! call:
//!
//! ```text
//! b0 0x10 -> b1 0x20 -> b2 0x40 -> b3 0x50 -> b5 0x70
//!                              \-> b4 0x30 -/
//! ```
//!
//! `lo_set_status` has a single block `w0` at 0x60. All addresses in the graph
//! are runtime addresses under a zero base, see [`rt`].
use crate::{
    addr::AddressTranslator,
    config::DraConfig,
    context::Context,
    model::{BlockId, FuncId, Program},
    rpc::{
        Condition, Dependency, DependencyRpc, Input, RpcError, WriteAddresses,
    },
    sta::{AnalysisUnit, Mod, WriteSetOracle, WriteSetResolver},
};

use std::{cell::Cell, collections::VecDeque, rc::Rc};

use rustc_hash::FxHashMap;

/// Runtime address of fuzzer pc `sym` under a zero base.
pub(crate) fn rt(sym: u64) -> u64 {
    AddressTranslator::with_base(0).to_runtime(sym).unwrap()
}

pub(crate) struct Fixture {
    pub program: Program,
    pub tr: AddressTranslator,
    pub b: [BlockId; 6],
    pub w0: BlockId,
    pub lo_ioctl: FuncId,
    pub set_status: FuncId,
}

pub(crate) fn fixture() -> Fixture {
    let mut p = Program::new();
    let lo_ioctl = p.add_function("drivers/block/loop.c", "lo_ioctl", true);
    let set_status = p.add_function("drivers/block/loop.c", "lo_set_status", true);

    let layout: [(u64, &[u64]); 6] = [
        (0x10, &[0x10, 0x14]),
        (0x20, &[0x20, 0x24]),
        (0x40, &[0x40, 0x44]),
        (0x50, &[0x50, 0x54, 0x58]),
        (0x30, &[0x30]),
        (0x70, &[0x70]),
    ];
    let mut b = [BlockId(0); 6];
    for (i, (pc, insts)) in layout.iter().enumerate() {
        b[i] = p.add_block(lo_ioctl, &format!("b{}", i), Some(rt(*pc)));
        for &a in insts.iter() {
            p.add_instruction(b[i], rt(a), 0);
        }
    }
    for &(from, to) in [(0, 1), (1, 2), (2, 3), (2, 4), (3, 5), (4, 5)].iter() {
        p.add_edge(b[from], b[to]);
    }

    let w0 = p.add_block(set_status, "w0", Some(rt(0x60)));
    p.add_instruction(w0, rt(0x60), 0);
    p.add_instruction(w0, rt(0x64), 0);

    Fixture {
        program: p,
        tr: AddressTranslator::with_base(0),
        b,
        w0,
        lo_ioctl,
        set_status,
    }
}

pub(crate) fn config() -> DraConfig {
    DraConfig::parse(
        r#"{"loop": {
            "file_taint": "loop.taint.json",
            "path_s": ["drivers/block/"],
            "function": {"loop_fops": {"unlocked_ioctl": {"name": "lo_ioctl"}}}
        }}"#,
    )
    .unwrap()
}

/// Context over the fixture with no analysis unit.
pub(crate) fn context() -> Context {
    let mut ctx = Context::new(fixture().program, config(), WriteSetResolver::new());
    ctx.translator.set_base(0);
    ctx
}

/// Context over the fixture with `oracle` analysing `drivers/block/`.
pub(crate) fn context_with(oracle: MapOracle) -> Context {
    let mut resolver = WriteSetResolver::new();
    resolver.add_unit(unit("loop", "drivers/block/", oracle));
    let mut ctx = Context::new(fixture().program, config(), resolver);
    ctx.translator.set_base(0);
    ctx
}

pub(crate) fn unit(name: &str, prefix: &str, oracle: MapOracle) -> AnalysisUnit {
    AnalysisUnit {
        name: name.into(),
        prefixes: vec![prefix.to_string()],
        oracle: Box::new(oracle),
    }
}

pub(crate) fn writer(block: BlockId, trait_fixed: bool) -> Mod {
    Mod {
        block,
        trait_fixed,
        repeat: 1,
        prio: 0,
        contexts: Vec::new(),
    }
}

/// Oracle answering from a map, counting the queries it gets.
#[derive(Default)]
pub(crate) struct MapOracle {
    pub answers: FxHashMap<(BlockId, usize), Vec<Mod>>,
    pub calls: Rc<Cell<usize>>,
}

impl WriteSetOracle for MapOracle {
    fn write_set(&self, _: &Program, terminal: BlockId, branch: usize) -> Option<Vec<Mod>> {
        self.calls.set(self.calls.get() + 1);
        self.answers.get(&(terminal, branch)).cloned()
    }
}

/// Scripted fuzzer. Empty queues answer `None` and `false`.
#[derive(Default)]
pub(crate) struct MockRpc {
    pub base: u32,
    pub batches: VecDeque<Option<Vec<Input>>>,
    pub conditions: VecDeque<Option<Vec<Condition>>>,
    pub alive: VecDeque<bool>,
    /// Number of upcoming calls to fail.
    pub fail_next: usize,
    /// Number of upcoming `push_dependency` calls to fail.
    pub fail_push: usize,

    pub reconnects: usize,
    pub totals: Vec<u32>,
    pub covered: Vec<u32>,
    pub dependencies: Vec<Dependency>,
    pub write_addresses: Vec<WriteAddresses>,
}

impl MockRpc {
    fn check(&mut self) -> Result<(), RpcError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            Err(RpcError::NotConnected)
        } else {
            Ok(())
        }
    }
}

impl DependencyRpc for MockRpc {
    fn address_base(&mut self) -> Result<u32, RpcError> {
        self.check()?;
        Ok(self.base)
    }

    fn report_basic_block_total(&mut self, count: u32) -> Result<(), RpcError> {
        self.check()?;
        self.totals.push(count);
        Ok(())
    }

    fn report_basic_block_covered(&mut self, count: u32) -> Result<(), RpcError> {
        self.check()?;
        self.covered.push(count);
        Ok(())
    }

    fn pull_new_inputs(&mut self) -> Result<Option<Vec<Input>>, RpcError> {
        self.check()?;
        Ok(self.batches.pop_front().flatten())
    }

    fn push_dependency(&mut self, dep: &Dependency) -> Result<(), RpcError> {
        self.check()?;
        if self.fail_push > 0 {
            self.fail_push -= 1;
            return Err(RpcError::NotConnected);
        }
        self.dependencies.push(dep.clone());
        Ok(())
    }

    fn pull_conditions(&mut self) -> Result<Option<Vec<Condition>>, RpcError> {
        self.check()?;
        Ok(self.conditions.pop_front().flatten())
    }

    fn push_write_addresses(&mut self, wa: &WriteAddresses) -> Result<(), RpcError> {
        self.check()?;
        self.write_addresses.push(wa.clone());
        Ok(())
    }

    fn session_alive(&mut self) -> Result<bool, RpcError> {
        self.check()?;
        Ok(self.alive.pop_front().unwrap_or(false))
    }

    fn reconnect(&mut self) -> Result<(), RpcError> {
        self.check()?;
        self.reconnects += 1;
        Ok(())
    }
}
