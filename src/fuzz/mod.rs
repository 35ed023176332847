//! Fuzzer-side bookkeeping: inputs, the ledger holding them and session statistics.
pub mod input;
pub mod ledger;
pub mod stats;

pub use input::Input;
pub use ledger::Ledger;
pub use stats::Stats;
