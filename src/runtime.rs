//! Runtime glue: collaborator traits, configuration, shutdown coordination,
//! telemetry, and runner orchestration.

pub mod broker;
pub mod config;
pub mod runner;
pub mod shutdown;
pub mod telemetry;
