//! Program graph of the kernel under test.
//!
//! Functions, basic blocks and instructions live in flat arenas owned by
//! [`Program`]; parent links are plain ids, so navigation in both directions
//! stays O(1) without shared ownership.
use crate::utils::to_boxed_str;

use std::{cell::RefCell, collections::hash_map::Entry, fmt, rc::Rc};

use rustc_hash::FxHashMap;

pub mod cover;
pub mod dom;
pub mod load;

pub use cover::parse_trace;
pub(crate) use dom::FunctionCfg;

macro_rules! id_type {
    ($(#[$m:meta])* $name:ident) => {
        $(#[$m])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Index of a function in [`Program`].
    FuncId
);
id_type!(
    /// Index of a basic block in [`Program`].
    BlockId
);
id_type!(
    /// Index of an instruction in [`Program`].
    InstId
);
id_type!(
    /// Index of an input in the ledger.
    InputId
);

/// Coverage state, only ever raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoverKind {
    /// Not known to be reachable by any input.
    Outside = 0,
    /// Successor of a covered block, not executed yet.
    Uncovered,
    /// Executed by at least one input.
    Covered,
}

impl Default for CoverKind {
    fn default() -> Self {
        CoverKind::Outside
    }
}

impl fmt::Display for CoverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoverKind::Outside => "outside",
            CoverKind::Uncovered => "uncovered",
            CoverKind::Covered => "covered",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub block: BlockId,
    pub address: u64,
    /// Source line, 0 if unknown.
    pub line: u32,
    pub state: CoverKind,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub function: FuncId,
    pub name: Box<str>,
    /// Address of the `__sanitizer_cov_trace_pc` call of this block, if instrumented.
    pub trace_pc_address: Option<u64>,
    pub state: CoverKind,
    pub instructions: Vec<InstId>,
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
    /// Inputs that executed this block and how many times they did.
    pub inputs: FxHashMap<InputId, u64>,
    /// Input that covered this block first.
    pub last_input: Option<InputId>,
}

#[derive(Debug, Clone)]
pub struct Function {
    /// Source file, relative to the kernel tree.
    pub path: Box<str>,
    pub name: Box<str>,
    /// Compiled from C with IR available. Assembly-only functions are `false`.
    pub compiled: bool,
    pub blocks: Vec<BlockId>,
    pub state: CoverKind,
    pub covered_blocks: u32,
}

impl Function {
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

#[derive(Debug, Default)]
pub struct Program {
    functions: Vec<Function>,
    blocks: Vec<BasicBlock>,
    instructions: Vec<Instruction>,

    by_address: FxHashMap<u64, InstId>,
    by_trace_pc: FxHashMap<u64, BlockId>,
    by_name: FxHashMap<Box<str>, Vec<FuncId>>,

    instrumented_blocks: u32,
    covered_blocks: u32,
    /// Runtime address -> unix time it was first reported.
    first_cover: FxHashMap<u64, u64>,

    cfgs: RefCell<FxHashMap<FuncId, Rc<FunctionCfg>>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, path: &str, name: &str, compiled: bool) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Function {
            path: to_boxed_str(path),
            name: to_boxed_str(name),
            compiled,
            blocks: Vec::new(),
            state: CoverKind::Outside,
            covered_blocks: 0,
        });
        self.by_name.entry(to_boxed_str(name)).or_default().push(id);
        id
    }

    pub fn add_block(&mut self, f: FuncId, name: &str, trace_pc_address: Option<u64>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            function: f,
            name: to_boxed_str(name),
            trace_pc_address,
            state: CoverKind::Outside,
            instructions: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            inputs: FxHashMap::default(),
            last_input: None,
        });
        self.functions[f.index()].blocks.push(id);
        if let Some(pc) = trace_pc_address {
            self.instrumented_blocks += 1;
            match self.by_trace_pc.entry(pc) {
                Entry::Occupied(old) => {
                    log::warn!("trace pc {:#x} shared by block {} and {}", pc, old.get(), id)
                }
                Entry::Vacant(e) => {
                    e.insert(id);
                }
            }
        }
        self.invalidate_cfg(f);
        id
    }

    pub fn add_instruction(&mut self, b: BlockId, address: u64, line: u32) -> InstId {
        let id = InstId(self.instructions.len() as u32);
        self.instructions.push(Instruction {
            block: b,
            address,
            line,
            state: CoverKind::Outside,
        });
        self.blocks[b.index()].instructions.push(id);
        self.by_address.entry(address).or_insert(id);
        id
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if self.blocks[from.index()].successors.contains(&to) {
            return;
        }
        self.blocks[from.index()].successors.push(to);
        self.blocks[to.index()].predecessors.push(from);
        let f = self.blocks[from.index()].function;
        self.invalidate_cfg(f);
    }

    fn invalidate_cfg(&mut self, f: FuncId) {
        self.cfgs.get_mut().remove(&f);
    }

    pub fn function(&self, f: FuncId) -> &Function {
        &self.functions[f.index()]
    }

    pub fn block(&self, b: BlockId) -> &BasicBlock {
        &self.blocks[b.index()]
    }

    pub fn instruction(&self, i: InstId) -> &Instruction {
        &self.instructions[i.index()]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    pub fn functions_named(&self, name: &str) -> &[FuncId] {
        self.by_name.get(name).map(|v| &v[..]).unwrap_or(&[])
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of instrumented blocks, the total reported to the peer.
    pub fn number_basic_blocks(&self) -> u32 {
        self.instrumented_blocks
    }

    pub fn number_basic_blocks_covered(&self) -> u32 {
        self.covered_blocks
    }

    pub fn instruction_at(&self, address: u64) -> Option<InstId> {
        self.by_address.get(&address).copied()
    }

    /// Block owning `address`, either one of its instructions or its trace pc.
    pub fn block_at(&self, address: u64) -> Option<BlockId> {
        self.instruction_at(address)
            .map(|i| self.instruction(i).block)
            .or_else(|| self.by_trace_pc.get(&address).copied())
    }

    /// Address identifying a block: its trace pc, or its first instruction.
    pub fn block_address(&self, b: BlockId) -> Option<u64> {
        let blk = self.block(b);
        blk.trace_pc_address
            .or_else(|| blk.instructions.first().map(|&i| self.instruction(i).address))
    }

    /// Last block of the fallthrough chain starting at `b`.
    ///
    /// The chain continues while the current block has exactly one successor in
    /// the same function and that successor has no other predecessor.
    pub fn terminal_block(&self, b: BlockId) -> BlockId {
        let mut cur = b;
        loop {
            let blk = self.block(cur);
            if blk.successors.len() != 1 {
                return cur;
            }
            let next = blk.successors[0];
            let next_blk = self.block(next);
            if next == b || next_blk.predecessors.len() != 1 || next_blk.function != blk.function
            {
                return cur;
            }
            cur = next;
        }
    }

    /// Unix time `address` was first reported by any input.
    pub fn first_cover(&self, address: u64) -> Option<u64> {
        self.first_cover.get(&address).copied()
    }

    /// Whether `address` was reported by any input or belongs to a covered block.
    pub fn is_covered_address(&self, address: u64) -> bool {
        self.first_cover.contains_key(&address)
            || self
                .block_at(address)
                .map_or(false, |b| self.block(b).state == CoverKind::Covered)
    }

    pub(crate) fn cfg(&self, f: FuncId) -> Rc<FunctionCfg> {
        if let Some(cfg) = self.cfgs.borrow().get(&f) {
            return Rc::clone(cfg);
        }
        let cfg = Rc::new(FunctionCfg::build(self, f));
        self.cfgs.borrow_mut().insert(f, Rc::clone(&cfg));
        cfg
    }
}
