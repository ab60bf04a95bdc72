//! Due-date sweep.
//!
//! Walks a tenant's invoice read models and dispatches `MarkOverdue` for
//! every invoice past its due date. The aggregate itself re-checks
//! eligibility, so a sweep racing a verification (or another sweep) at
//! worst dispatches a command that decides nothing.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;

use campusledger_core::TenantId;
use campusledger_events::{EventBus, EventEnvelope};
use campusledger_invoicing::{
    Invoice, InvoiceCommand, InvoiceId, InvoiceStatus, MarkOverdue,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::invoices::InvoiceReadModel;
use crate::read_model::TenantStore;

/// Tally of one sweep run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    /// Invoices newly marked overdue.
    pub marked: usize,
    /// Candidates the aggregate declined (already settled, already overdue,
    /// or raced by a concurrent command).
    pub skipped: usize,
    /// Candidates whose dispatch failed outright.
    pub failed: usize,
}

/// The overdue sweep service.
pub struct OverdueSweep<S, B, R> {
    store: S,
    bus: B,
    invoices: R,
}

impl<S, B, R> OverdueSweep<S, B, R>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>> + Clone,
    R: TenantStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(store: S, bus: B, invoices: R) -> Self {
        Self { store, bus, invoices }
    }

    /// Run one sweep for a tenant as of `as_of`.
    ///
    /// Per-invoice failures are tallied rather than aborting the run; a
    /// sweep is periodic, so the next run picks up whatever this one missed.
    pub fn run(&self, tenant_id: TenantId, as_of: NaiveDate, now: DateTime<Utc>) -> SweepOutcome {
        let dispatcher = CommandDispatcher::new(self.store.clone(), self.bus.clone());
        let mut outcome = SweepOutcome::default();

        for rm in self.invoices.list(tenant_id) {
            let candidate = matches!(
                rm.status,
                InvoiceStatus::Pending | InvoiceStatus::PartiallyPaid
            ) && rm.due_date < as_of;
            if !candidate {
                continue;
            }

            let result = dispatcher.dispatch::<Invoice>(
                tenant_id,
                rm.invoice_id.0,
                "fees.invoice",
                InvoiceCommand::MarkOverdue(MarkOverdue {
                    tenant_id,
                    invoice_id: rm.invoice_id,
                    as_of,
                    occurred_at: now,
                }),
                |_, id| Invoice::empty(InvoiceId::new(id)),
            );

            match result {
                Ok(committed) if committed.is_empty() => outcome.skipped += 1,
                Ok(_) => outcome.marked += 1,
                // A concurrent write moved the stream; the read model was
                // stale and the next sweep will reconsider.
                Err(DispatchError::Concurrency(_)) => outcome.skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        invoice_id = %rm.invoice_id,
                        error = ?e,
                        "overdue sweep dispatch failed"
                    );
                    outcome.failed += 1;
                }
            }
        }

        tracing::info!(
            tenant_id = %tenant_id,
            marked = outcome.marked,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "overdue sweep finished"
        );
        outcome
    }
}
