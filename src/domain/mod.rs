//! Pipeline vocabulary: blocks, tasks, balances, outcomes and the ports the
//! orchestrator talks through.

pub mod balance;
pub mod block;
pub mod outcome;
pub mod ports;
pub mod task;
