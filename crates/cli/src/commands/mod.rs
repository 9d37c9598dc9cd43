//! Subcommand implementations

pub mod forecast;
pub mod retrain;
pub mod status;
