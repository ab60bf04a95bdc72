//! Invoicing domain module (event-sourced).
//!
//! Business rules for student fee invoices and manual payment
//! reconciliation, implemented purely as deterministic domain logic (no IO,
//! no HTTP, no storage). Payment claims live on the invoice stream, so
//! per-invoice verification is serialized by the stream's optimistic
//! concurrency and the verified sum is always recomputed against the full
//! claim set.

pub mod invoice;

pub use invoice::{
    ApplyDiscount, CancelInvoice, ClaimStatus, DiscountApplied, Invoice, InvoiceCancelled,
    InvoiceCharge, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceMarkedOverdue, InvoiceNumber,
    InvoiceRaised, InvoiceStatus, MarkOverdue, PaymentClaim, PaymentMethod, PaymentRejected,
    PaymentSubmitted, PaymentVerified, RaiseInvoice, RejectPayment, SubmitPayment, TransactionId,
    VerifyPayment,
};
