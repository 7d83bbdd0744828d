//! Infrastructure layer: event log, aggregator, command dispatch, projections.

pub mod aggregator;
pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;
