//! Reporting over the invoice read models.
//!
//! Summaries are recomputed lazily from the read models on every call
//! rather than maintained as running balances, so they cannot drift from
//! the projected state.

use campusledger_core::{Money, TenantId};
use campusledger_invoicing::{InvoiceId, InvoiceStatus};

use crate::projections::invoices::InvoiceReadModel;
use crate::read_model::TenantStore;

/// Tenant-wide fee position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSummary {
    /// Sum of net amounts over all non-cancelled invoices.
    pub total_invoiced: Money,
    /// Sum of verified payment amounts across every invoice, cancelled ones
    /// included: a verified settlement stays collected even if its invoice
    /// is later cancelled.
    pub total_collected: Money,
    /// Sum of net amounts over pending, partially paid, and overdue
    /// invoices.
    pub total_pending: Money,
    /// Sum of the still-unsettled balances (net minus verified) over the
    /// same pending set.
    pub total_outstanding: Money,
    pub invoice_count: u64,
    pub overdue_count: u64,
    pub cancelled_count: u64,
}

/// Read-side reporting service.
pub struct ReportingService<R> {
    invoices: R,
}

impl<R> ReportingService<R>
where
    R: TenantStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(invoices: R) -> Self {
        Self { invoices }
    }

    pub fn summarize(&self, tenant_id: TenantId) -> FeeSummary {
        let mut total_invoiced = 0u64;
        let mut total_collected = 0u64;
        let mut total_pending = 0u64;
        let mut total_outstanding = 0u64;
        let mut invoice_count = 0u64;
        let mut overdue_count = 0u64;
        let mut cancelled_count = 0u64;

        for rm in self.invoices.list(tenant_id) {
            total_collected = total_collected.saturating_add(rm.verified_amount.minor());
            if rm.status == InvoiceStatus::Cancelled {
                cancelled_count += 1;
                continue;
            }
            invoice_count += 1;
            total_invoiced = total_invoiced.saturating_add(rm.net_amount().minor());
            match rm.status {
                InvoiceStatus::Pending | InvoiceStatus::PartiallyPaid | InvoiceStatus::Overdue => {
                    total_pending = total_pending.saturating_add(rm.net_amount().minor());
                    total_outstanding =
                        total_outstanding.saturating_add(rm.outstanding_amount().minor());
                }
                _ => {}
            }
            if rm.status == InvoiceStatus::Overdue {
                overdue_count += 1;
            }
        }

        FeeSummary {
            total_invoiced: Money::from_minor(total_invoiced),
            total_collected: Money::from_minor(total_collected),
            total_pending: Money::from_minor(total_pending),
            total_outstanding: Money::from_minor(total_outstanding),
            invoice_count,
            overdue_count,
            cancelled_count,
        }
    }

    /// Most recently raised invoices, newest first.
    pub fn recent(&self, tenant_id: TenantId, limit: usize) -> Vec<InvoiceReadModel> {
        let mut invoices = self.invoices.list(tenant_id);
        invoices.sort_by(|a, b| b.raised_at.cmp(&a.raised_at));
        invoices.truncate(limit);
        invoices
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};

    use campusledger_catalog::AcademicYear;
    use campusledger_core::AggregateId;
    use campusledger_directory::{ClassId, StudentId};
    use campusledger_invoicing::InvoiceNumber;

    use super::*;
    use crate::read_model::InMemoryTenantStore;

    fn read_model(
        status: InvoiceStatus,
        total_minor: u64,
        discount_minor: u64,
        verified_minor: u64,
    ) -> InvoiceReadModel {
        InvoiceReadModel {
            invoice_id: InvoiceId::new(AggregateId::new()),
            student_id: StudentId::new(),
            class_id: ClassId::new(),
            invoice_number: InvoiceNumber::new("INV-00001-AB12CD"),
            academic_year: AcademicYear::new("2026-27").unwrap(),
            status,
            charges: vec![],
            total_amount: Money::from_minor(total_minor),
            discount_amount: Money::from_minor(discount_minor),
            verified_amount: Money::from_minor(verified_minor),
            due_date: NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
            raised_at: Utc::now(),
            transactions: vec![],
        }
    }

    fn service_with(
        tenant_id: TenantId,
        models: Vec<InvoiceReadModel>,
    ) -> ReportingService<Arc<InMemoryTenantStore<InvoiceId, InvoiceReadModel>>> {
        let store = Arc::new(InMemoryTenantStore::new());
        for rm in models {
            store.upsert(tenant_id, rm.invoice_id, rm);
        }
        ReportingService::new(store)
    }

    #[test]
    fn pending_counts_full_net_amounts_not_balances() {
        // One invoice of 5000.00 with 2000.00 verified: the pending figure
        // is the whole net amount, the balance shows up as outstanding.
        let tenant_id = TenantId::new();
        let reporting = service_with(
            tenant_id,
            vec![read_model(InvoiceStatus::PartiallyPaid, 500_000, 0, 200_000)],
        );

        let summary = reporting.summarize(tenant_id);
        assert_eq!(summary.total_pending, Money::from_minor(500_000));
        assert_eq!(summary.total_outstanding, Money::from_minor(300_000));
        assert_eq!(summary.total_collected, Money::from_minor(200_000));
    }

    #[test]
    fn cancelled_invoices_keep_their_verified_amounts_collected() {
        let tenant_id = TenantId::new();
        let reporting = service_with(
            tenant_id,
            vec![
                read_model(InvoiceStatus::Cancelled, 500_000, 0, 100_000),
                read_model(InvoiceStatus::Paid, 300_000, 0, 300_000),
            ],
        );

        let summary = reporting.summarize(tenant_id);
        assert_eq!(summary.total_collected, Money::from_minor(400_000));
        // The cancelled invoice contributes nothing else.
        assert_eq!(summary.total_invoiced, Money::from_minor(300_000));
        assert_eq!(summary.total_pending, Money::ZERO);
        assert_eq!(summary.invoice_count, 1);
        assert_eq!(summary.cancelled_count, 1);
    }

    #[test]
    fn overdue_invoices_are_pending_and_counted() {
        let tenant_id = TenantId::new();
        let reporting = service_with(
            tenant_id,
            vec![
                read_model(InvoiceStatus::Overdue, 400_000, 100_000, 0),
                read_model(InvoiceStatus::Pending, 200_000, 0, 0),
            ],
        );

        let summary = reporting.summarize(tenant_id);
        assert_eq!(summary.total_pending, Money::from_minor(500_000));
        assert_eq!(summary.total_outstanding, Money::from_minor(500_000));
        assert_eq!(summary.overdue_count, 1);
        assert_eq!(summary.invoice_count, 2);
    }
}
