use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use campusledger_catalog::AcademicYear;
use campusledger_core::{AggregateId, Money, TenantId};
use campusledger_directory::{ClassId, StudentId};
use campusledger_events::EventEnvelope;
use campusledger_invoicing::{
    ClaimStatus, InvoiceCharge, InvoiceEvent, InvoiceId, InvoiceNumber, InvoiceStatus,
    PaymentMethod, TransactionId,
};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::TenantStore;

/// One payment claim as exposed to queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReadModel {
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub status: ClaimStatus,
    pub submitted_at: DateTime<Utc>,
    pub reject_reason: Option<String>,
}

/// Queryable invoice read model (header + charges + payment claims).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub student_id: StudentId,
    pub class_id: ClassId,
    pub invoice_number: InvoiceNumber,
    pub academic_year: AcademicYear,
    pub status: InvoiceStatus,
    pub charges: Vec<InvoiceCharge>,
    pub total_amount: Money,
    pub discount_amount: Money,
    pub verified_amount: Money,
    pub due_date: NaiveDate,
    pub raised_at: DateTime<Utc>,
    pub transactions: Vec<TransactionReadModel>,
}

impl InvoiceReadModel {
    pub fn net_amount(&self) -> Money {
        Money::from_minor(
            self.total_amount
                .minor()
                .saturating_sub(self.discount_amount.minor()),
        )
    }

    pub fn outstanding_amount(&self) -> Money {
        Money::from_minor(
            self.net_amount()
                .minor()
                .saturating_sub(self.verified_amount.minor()),
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum InvoiceProjectionError {
    #[error("failed to deserialize invoice event: {0}")]
    Deserialize(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
    #[error("no read model for invoice {0}")]
    MissingReadModel(InvoiceId),
}

/// Projection of invoice streams into per-invoice read models, plus a
/// transaction-id index so a payment claim can be located without knowing
/// its invoice.
#[derive(Debug)]
pub struct InvoicesProjection<S, X, C = InMemoryCursorStore>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
    X: TenantStore<TransactionId, InvoiceId>,
{
    store: S,
    transaction_index: X,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S, X> InvoicesProjection<S, X>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
    X: TenantStore<TransactionId, InvoiceId>,
{
    pub fn new(store: S, transaction_index: X) -> Self {
        Self {
            store,
            transaction_index,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "fees.invoices".to_string(),
        }
    }

    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> InvoicesProjection<S, X, C> {
        InvoicesProjection {
            store: self.store,
            transaction_index: self.transaction_index,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, X, C> InvoicesProjection<S, X, C>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
    X: TenantStore<TransactionId, InvoiceId>,
    C: ProjectionCursorStore + 'static,
{
    fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store
                .get_cursor(tenant_id, aggregate_id, &self.projection_name)
                .unwrap_or(0)
        } else {
            match self.cursors.read() {
                Ok(cursors) => *cursors
                    .get(&CursorKey {
                        tenant_id,
                        aggregate_id,
                    })
                    .unwrap_or(&0),
                Err(_) => 0,
            }
        }
    }

    fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                },
                seq,
            );
        }
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.update_cursor(tenant_id, aggregate_id, &self.projection_name, seq);
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.clear_cursors(tenant_id, &self.projection_name);
        }
    }

    pub fn get(&self, tenant_id: TenantId, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.store.get(tenant_id, invoice_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<InvoiceReadModel> {
        self.store.list(tenant_id)
    }

    /// Locate the invoice that carries a payment claim.
    pub fn find_by_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: &TransactionId,
    ) -> Option<InvoiceReadModel> {
        let invoice_id = self.transaction_index.get(tenant_id, transaction_id)?;
        self.store.get(tenant_id, &invoice_id)
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), InvoiceProjectionError> {
        if envelope.aggregate_type() != "fees.invoice" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(InvoiceProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(InvoiceProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| InvoiceProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, invoice_id) = match &ev {
            InvoiceEvent::InvoiceRaised(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::DiscountApplied(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::PaymentSubmitted(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::PaymentVerified(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::PaymentRejected(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::InvoiceMarkedOverdue(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::InvoiceCancelled(e) => (e.tenant_id, e.invoice_id),
        };

        if event_tenant != tenant_id {
            return Err(InvoiceProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if invoice_id.0 != aggregate_id {
            return Err(InvoiceProjectionError::TenantIsolation(
                "event invoice_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            InvoiceEvent::InvoiceRaised(e) => {
                self.store.upsert(
                    tenant_id,
                    e.invoice_id,
                    InvoiceReadModel {
                        invoice_id: e.invoice_id,
                        student_id: e.student_id,
                        class_id: e.class_id,
                        invoice_number: e.invoice_number,
                        academic_year: e.academic_year,
                        status: InvoiceStatus::Pending,
                        charges: e.charges,
                        total_amount: e.total_amount,
                        discount_amount: Money::ZERO,
                        verified_amount: Money::ZERO,
                        due_date: e.due_date,
                        raised_at: e.occurred_at,
                        transactions: vec![],
                    },
                );
            }
            InvoiceEvent::DiscountApplied(e) => {
                let mut rm = self.load(tenant_id, e.invoice_id)?;
                rm.discount_amount = e.discount;
                // A discount that closes the balance settles the invoice.
                if !matches!(rm.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
                    && rm.verified_amount >= rm.net_amount()
                {
                    rm.status = InvoiceStatus::Paid;
                }
                self.store.upsert(tenant_id, e.invoice_id, rm);
            }
            InvoiceEvent::PaymentSubmitted(e) => {
                let mut rm = self.load(tenant_id, e.invoice_id)?;
                rm.transactions.push(TransactionReadModel {
                    transaction_id: e.transaction_id,
                    amount: e.amount,
                    method: e.method,
                    reference: e.reference,
                    status: ClaimStatus::Submitted,
                    submitted_at: e.occurred_at,
                    reject_reason: None,
                });
                self.store.upsert(tenant_id, e.invoice_id, rm);
                self.transaction_index
                    .upsert(tenant_id, e.transaction_id, e.invoice_id);
            }
            InvoiceEvent::PaymentVerified(e) => {
                let mut rm = self.load(tenant_id, e.invoice_id)?;
                if let Some(txn) = rm
                    .transactions
                    .iter_mut()
                    .find(|t| t.transaction_id == e.transaction_id)
                {
                    txn.status = ClaimStatus::Verified;
                }
                rm.verified_amount = e.new_verified_total;
                rm.status = if rm.verified_amount >= rm.net_amount() {
                    InvoiceStatus::Paid
                } else {
                    InvoiceStatus::PartiallyPaid
                };
                self.store.upsert(tenant_id, e.invoice_id, rm);
            }
            InvoiceEvent::PaymentRejected(e) => {
                let mut rm = self.load(tenant_id, e.invoice_id)?;
                if let Some(txn) = rm
                    .transactions
                    .iter_mut()
                    .find(|t| t.transaction_id == e.transaction_id)
                {
                    txn.status = ClaimStatus::Rejected;
                    txn.reject_reason = Some(e.reason);
                }
                self.store.upsert(tenant_id, e.invoice_id, rm);
            }
            InvoiceEvent::InvoiceMarkedOverdue(e) => {
                let mut rm = self.load(tenant_id, e.invoice_id)?;
                rm.status = InvoiceStatus::Overdue;
                self.store.upsert(tenant_id, e.invoice_id, rm);
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                let mut rm = self.load(tenant_id, e.invoice_id)?;
                rm.status = InvoiceStatus::Cancelled;
                self.store.upsert(tenant_id, e.invoice_id, rm);
            }
        }

        self.update_cursor(tenant_id, aggregate_id, seq);
        Ok(())
    }

    // Non-creation events always follow InvoiceRaised within the stream, so
    // a missing read model means the stream was corrupted or replayed out
    // of order.
    fn load(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<InvoiceReadModel, InvoiceProjectionError> {
        self.store
            .get(tenant_id, &invoice_id)
            .ok_or(InvoiceProjectionError::MissingReadModel(invoice_id))
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), InvoiceProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.transaction_index.clear_tenant(t);
                self.clear_cursors(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
