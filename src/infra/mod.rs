//! Infrastructure
//!
//! Wrappers around external programs (process execution, container runtime CLI)

pub mod command;
pub mod runtime;

#[cfg(test)]
pub(crate) mod fake;

pub use command::CommandRunner;
pub use runtime::{CliGateway, ContainerGateway};
