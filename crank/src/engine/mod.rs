pub mod allocation;
pub mod balance;
pub mod disburse;
pub mod eligibility;
pub mod harvest;
pub mod holders;
pub mod orchestrator;
pub mod split;
pub mod swap;

pub use allocation::{allocate, Allocation, RemainderPolicy};
pub use orchestrator::{Orchestrator, RunOutcome, RunPhase, RunSummary, SkipReason};
pub use swap::SwapResult;
