//! Subcommand implementations.

pub mod export;
pub mod jobs;
pub mod run;
pub mod sources;
