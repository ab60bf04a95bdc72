//! `campusledger-catalog` — fee catalog domain module.
//!
//! One `FeeCatalog` aggregate per school holds its fee heads (named charge
//! categories) and fee structures (class + head + academic year → amount).
//! Keeping the whole catalog on one stream serializes catalog mutations per
//! tenant through optimistic concurrency.

pub mod catalog;
pub mod year;

pub use catalog::{
    ApplicableFee, CatalogCommand, CatalogEvent, CatalogId, CreateFeeHead, DeactivateFeeHead,
    FeeCatalog, FeeHeadCreated, FeeHeadDeactivated, FeeHeadId, FeeStructureId, FeeStructureSet,
    InvoiceRunRecorded, RecordInvoiceRun, SetFeeStructure,
};
pub use year::AcademicYear;
