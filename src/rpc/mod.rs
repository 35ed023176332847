//! Messages exchanged with the fuzzer and the calls carrying them.
//!
//! Every address crossing this boundary is in the fuzzer's address space.
#[macro_use]
pub mod codec;
pub mod session;
pub mod tcp;

use std::{collections::BTreeMap, io};

use thiserror::Error;

pub use codec::{CodecError, Decode, Encode, MAX_MESSAGE_SIZE};
pub use session::{Session, SessionConfig, SessionState};
pub use tcp::TcpRpc;

/// A branch arm not taken yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    pub condition_address: u64,
    pub uncovered_address: u64,
    /// Index of the call that reached the branch.
    pub idx: u32,
    /// `1 << i` for the i-th successor of the branch.
    pub successor: u32,
    /// Uncovered blocks reachable through the arm.
    pub right_branch_address: Vec<u64>,
}
wire_struct!(Condition {
    condition_address,
    uncovered_address,
    idx,
    successor,
    right_branch_address
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCover {
    pub idx: u32,
    /// pc -> hits.
    pub addresses: BTreeMap<u64, u32>,
}
wire_struct!(CallCover { idx, addresses });

/// A program the fuzzer ran, with the coverage of each of its calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Input {
    pub sig: String,
    pub program: String,
    pub calls: BTreeMap<u32, CallCover>,
}
wire_struct!(Input { sig, program, calls });

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncoveredAddressKind {
    InputRelated,
    DependencyRelated,
}
wire_enum!(UncoveredAddressKind {
    InputRelated = 0,
    DependencyRelated = 1
});

impl Default for UncoveredAddressKind {
    fn default() -> Self {
        UncoveredAddressKind::InputRelated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatementKind {
    Constant,
    Nonconstant,
}
wire_enum!(WriteStatementKind {
    Constant = 0,
    Nonconstant = 1
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Untested,
    Testing,
    Tested,
}
wire_enum!(TaskStatus {
    Untested = 0,
    Testing = 1,
    Tested = 2
});

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Untested
    }
}

/// State the fuzzer keeps while trying to hit an uncovered address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTimeData {
    pub program: String,
    pub task_status: TaskStatus,
    pub recursive_count: u32,
    pub idx: u32,
    pub check_condition: bool,
    pub condition_address: u64,
    pub check_address: bool,
    pub address: u64,
    pub right_branch_address: Vec<u64>,
}
wire_struct!(RunTimeData {
    program,
    task_status,
    recursive_count,
    idx,
    check_condition,
    condition_address,
    check_address,
    address,
    right_branch_address
});

impl RunTimeData {
    /// Fresh task for reaching `address` behind `condition_address`.
    pub fn untested(program: &str, idx: u32, condition_address: u64, address: u64) -> Self {
        Self {
            program: program.to_string(),
            task_status: TaskStatus::Untested,
            recursive_count: 0,
            idx,
            condition_address,
            address,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteAddressAttributes {
    pub write_address: u64,
    pub repeat: u32,
    pub prio: i32,
}
wire_struct!(WriteAddressAttributes {
    write_address,
    repeat,
    prio
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAddress {
    pub write_address: u64,
    pub kind: WriteStatementKind,
    /// Operations table -> flag of the member reaching the write.
    pub file_operations_function: BTreeMap<String, u32>,
    pub uncovered_address: BTreeMap<u64, WriteAddressAttributes>,
    pub run_time_data: RunTimeData,
    /// Signature -> times the input executed the writer.
    pub input: BTreeMap<String, u64>,
}
wire_struct!(WriteAddress {
    write_address,
    kind,
    file_operations_function,
    uncovered_address,
    run_time_data,
    input
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UncoveredAddress {
    pub condition_address: u64,
    pub uncovered_address: u64,
    pub right_branch_address: Vec<u64>,
    pub kind: UncoveredAddressKind,
    pub number_arrive_basicblocks: u32,
    pub number_dominator_instructions: u32,
    /// Signature -> index of the call reaching the branch.
    pub input: BTreeMap<String, u32>,
    pub write_address: BTreeMap<u64, WriteAddressAttributes>,
    pub run_time_data: Option<RunTimeData>,
}
wire_struct!(UncoveredAddress {
    condition_address,
    uncovered_address,
    right_branch_address,
    kind,
    number_arrive_basicblocks,
    number_dominator_instructions,
    input,
    write_address,
    run_time_data
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyInput {
    pub sig: String,
    pub program: String,
    pub number_conditions: u32,
    pub number_conditions_dependency: u32,
    /// Uncovered address -> index of the call reaching its branch.
    pub uncovered_address: BTreeMap<u64, u32>,
}
wire_struct!(DependencyInput {
    sig,
    program,
    number_conditions,
    number_conditions_dependency,
    uncovered_address
});

/// Report on one uncovered arm reached by an input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependency {
    pub input: DependencyInput,
    pub uncovered_address: UncoveredAddress,
    pub write_address: Vec<WriteAddress>,
}
wire_struct!(Dependency {
    input,
    uncovered_address,
    write_address
});

/// Writers of a condition the fuzzer asked about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteAddresses {
    pub condition: Condition,
    pub write_address: Vec<WriteAddress>,
}
wire_struct!(WriteAddresses {
    condition,
    write_address
});

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("not connected")]
    NotConnected,
    #[error("call timed out")]
    Timeout,
    #[error("peer error: {0}")]
    Peer(String),
}

/// Calls offered by the fuzzer.
pub trait DependencyRpc {
    /// High word of kernel addresses, in the fuzzer's notation.
    fn address_base(&mut self) -> Result<u32, RpcError>;

    fn report_basic_block_total(&mut self, count: u32) -> Result<(), RpcError>;

    fn report_basic_block_covered(&mut self, count: u32) -> Result<(), RpcError>;

    /// Inputs the fuzzer found since the last pull, `None` if there are none.
    fn pull_new_inputs(&mut self) -> Result<Option<Vec<Input>>, RpcError>;

    fn push_dependency(&mut self, dep: &Dependency) -> Result<(), RpcError>;

    /// Conditions the fuzzer wants writers for, `None` if there are none.
    fn pull_conditions(&mut self) -> Result<Option<Vec<Condition>>, RpcError>;

    fn push_write_addresses(&mut self, wa: &WriteAddresses) -> Result<(), RpcError>;

    /// Whether the fuzzer wants the session to go on.
    fn session_alive(&mut self) -> Result<bool, RpcError>;

    /// Drop the current connection and open a new one.
    fn reconnect(&mut self) -> Result<(), RpcError>;
}

#[cfg(test)]
mod tests {
    use super::{codec::*, *};

    #[test]
    fn dependency_survives_the_wire() {
        let mut dep = Dependency::default();
        dep.input.sig = "3f2a".into();
        dep.input.uncovered_address.insert(0x50, 1);
        dep.uncovered_address.kind = UncoveredAddressKind::DependencyRelated;
        dep.uncovered_address.run_time_data = Some(RunTimeData::untested("p", 1, 0x40, 0x50));
        dep.write_address.push(WriteAddress {
            write_address: 0x60,
            kind: WriteStatementKind::Constant,
            file_operations_function: BTreeMap::new(),
            uncovered_address: BTreeMap::new(),
            run_time_data: RunTimeData::default(),
            input: BTreeMap::new(),
        });
        let bytes = to_bytes(&dep);
        assert_eq!(bytes.len(), dep.encoded_len());
        let back: Dependency = from_bytes(&bytes).unwrap();
        assert_eq!(back, dep);
    }

    #[test]
    fn unknown_enum_tag() {
        assert!(matches!(
            from_bytes::<WriteStatementKind>(&[9]),
            Err(CodecError::BadTag { tag: 9, .. })
        ));
    }
}
