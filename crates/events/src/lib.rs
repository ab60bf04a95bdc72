//! `campusledger-events` — event abstractions for the fee ledger.
//!
//! The `Event` trait, the tenant-scoped `EventEnvelope` persisted per stream,
//! and the pub/sub `EventBus` used to feed projections after events are
//! committed to the store.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
