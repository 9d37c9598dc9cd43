//! Flood forecaster service
//!
//! HTTP surface and configuration for the forecast engine. The binary wires
//! these together with the scheduler.

pub mod api;
pub mod config;
