//! Infrastructure layer: event store, command dispatch, projections, and the
//! fee-ledger application services built on top of them.

pub(crate) mod blocking;
pub mod command_dispatcher;
pub mod event_store;
pub mod generation;
pub mod invoice_numbers;
pub mod projections;
pub mod read_model;
pub mod reporting;
pub mod sweep;

#[cfg(test)]
mod integration_tests;
