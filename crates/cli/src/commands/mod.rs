//! Subcommand implementations

pub mod health;
pub mod resources;
pub mod restart;
