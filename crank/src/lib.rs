pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod events;
pub mod instructions;
pub mod logging;
pub mod rpc;
pub mod states;

#[cfg(test)]
mod mock;

pub use config::{CrankArgs, DistributionConfig};
pub use errors::{CrankError, Result};
