//! Static write-set analysis results and the cache in front of them.
//!
//! The analysis itself runs offline. For a branching block and one of its arms
//! it tells which blocks write the data the branch condition reads. Here it is
//! consumed through [`WriteSetOracle`], one oracle per analysis unit.
use crate::model::{BlockId, Program};

use std::rc::Rc;

pub mod resolver;
pub mod result;

pub use resolver::{AnalysisUnit, WriteSetResolver};
pub use result::{ResultError, StaticResult};

/// Call context of a write: the commands that reach it and the instruction
/// chain from the entry of the handling function down to the write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    pub cmds: Vec<u64>,
    /// Instruction addresses, entry first.
    pub chain: Vec<u64>,
}

/// A block writing data observed by a branch condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mod {
    pub block: BlockId,
    /// Written value is a compile-time constant.
    pub trait_fixed: bool,
    pub repeat: u32,
    pub prio: i32,
    pub contexts: Vec<CallContext>,
}

/// Outcome of a write-set lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteSet {
    /// No analysis covers the branch, or the branch is not tainted by any global.
    Unresolved,
    /// Analysed. Empty when no concrete writer was found.
    Resolved(Rc<[Mod]>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Nothing global decides the branch, only the input does.
    InputRelated,
    /// Depends on global state, but no writer is known.
    DependencyUnwritten,
    /// Depends on global state written by known blocks.
    DependencyWritten,
}

impl WriteSet {
    pub fn classify(&self) -> Classification {
        match self {
            WriteSet::Unresolved => Classification::InputRelated,
            WriteSet::Resolved(m) if m.is_empty() => Classification::DependencyUnwritten,
            WriteSet::Resolved(_) => Classification::DependencyWritten,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, WriteSet::Resolved(_))
    }

    pub fn writers(&self) -> &[Mod] {
        match self {
            WriteSet::Unresolved => &[],
            WriteSet::Resolved(m) => m,
        }
    }
}

/// Static analysis of one unit.
pub trait WriteSetOracle {
    /// Writers of the data read by the branch ending `terminal`, for its arm `branch`.
    ///
    /// `None` when the unit has no answer for that branch.
    fn write_set(&self, program: &Program, terminal: BlockId, branch: usize) -> Option<Vec<Mod>>;
}
