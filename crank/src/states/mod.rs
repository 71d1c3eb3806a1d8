pub mod distribution_ledger;
pub mod ledger_store;

pub use distribution_ledger::*;
pub use ledger_store::*;
