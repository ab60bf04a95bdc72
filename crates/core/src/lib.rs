//! `campusledger-core` — domain foundation building blocks.
//!
//! Pure domain primitives shared by the fee-ledger crates. No infrastructure
//! concerns live here.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
pub use money::Money;
pub use value_object::ValueObject;
