//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are rebuildable from the event streams, tenant-isolated,
//! and idempotent under at-least-once delivery.

pub mod catalog;
pub mod cursor_store;
pub mod invoices;

pub use catalog::{
    CatalogProjection, CatalogProjectionError, FeeHeadReadModel, FeeStructureReadModel,
};
pub use cursor_store::{InMemoryCursorStore, PostgresCursorStore, ProjectionCursorStore};
pub use invoices::{
    InvoiceProjectionError, InvoiceReadModel, InvoicesProjection, TransactionReadModel,
};
