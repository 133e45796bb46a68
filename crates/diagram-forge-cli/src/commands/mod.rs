//! CLI command implementations.

pub mod catalog;
pub mod config;
pub mod run;
pub mod session;
pub mod state;
