//! CLI tool for inspecting token rings and exercising the router.
//!
//! Provides commands for:
//! - Computing the token of a row key
//! - Inspecting a ring description and where keys route
//! - Load-testing the message store against an in-memory cluster

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
