//! `campusledger-directory` — boundary to platform-owned reference data.
//!
//! Students, class sections and school (tenant) records are owned by the
//! surrounding administration platform; the ledger only reads them. This
//! crate defines the traits the ledger consumes plus in-memory
//! implementations for dev/test wiring.

pub mod student;
pub mod tenant;

pub use student::{
    ClassId, InMemoryStudentDirectory, StudentDirectory, StudentId, StudentRecord,
};
pub use tenant::{InMemoryTenantRegistry, TenantRegistry, TenantSettings};
