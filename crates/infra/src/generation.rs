//! Invoice generation runs.
//!
//! A run invoices an explicit cohort of students for one academic year,
//! pricing each student from the fee structures of their class. Students
//! the run cannot invoice (unknown to the directory, or with nothing
//! priced for their class) are reported as skipped rather than failing
//! the batch. Each affected class/year is locked on the catalog before
//! the invoice streams are committed in a single atomic batch, so a
//! later re-pricing of those structures is refused; further runs for the
//! same class (late admissions, corrections) remain possible.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use campusledger_catalog::{
    AcademicYear, CatalogCommand, CatalogEvent, CatalogId, FeeCatalog, RecordInvoiceRun,
};
use campusledger_core::{Aggregate, AggregateId, ExpectedVersion, Money, TenantId};
use campusledger_directory::{ClassId, StudentDirectory, StudentId, StudentRecord};
use campusledger_events::{EventBus, EventEnvelope};
use campusledger_invoicing::{
    Invoice, InvoiceCharge, InvoiceCommand, InvoiceId, InvoiceNumber, RaiseInvoice,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, EventStoreError, StreamAppend, UncommittedEvent};
use crate::invoice_numbers::{InvoiceNumberAllocator, NumberAllocationError};

/// One generation run: a cohort of students, an academic year, and a due date.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub tenant_id: TenantId,
    pub student_ids: Vec<StudentId>,
    pub academic_year: AcademicYear,
    pub due_date: NaiveDate,
    pub today: NaiveDate,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedInvoice {
    pub invoice_id: InvoiceId,
    pub student_id: StudentId,
    pub invoice_number: InvoiceNumber,
    pub total_amount: Money,
}

/// A student the run could not invoice, with the refusal reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedStudent {
    pub student_id: StudentId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub invoices: Vec<GeneratedInvoice>,
    pub skipped: Vec<SkippedStudent>,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Validation(String),
    #[error("invoice numbering failed: {0}")]
    Numbering(#[from] NumberAllocationError),
    #[error("command dispatch failed: {0:?}")]
    Dispatch(DispatchError),
    #[error(transparent)]
    Store(#[from] EventStoreError),
    #[error("event publication failed after commit: {0}")]
    Publish(String),
}

/// The invoice generation service.
pub struct InvoiceGenerator<S, B, D> {
    store: S,
    bus: B,
    directory: D,
    numbers: Arc<InvoiceNumberAllocator>,
}

struct PricedStudent {
    record: StudentRecord,
    charges: Vec<InvoiceCharge>,
}

impl<S, B, D> InvoiceGenerator<S, B, D>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>> + Clone,
    D: StudentDirectory,
{
    pub fn new(store: S, bus: B, directory: D, numbers: Arc<InvoiceNumberAllocator>) -> Self {
        Self {
            store,
            bus,
            directory,
            numbers,
        }
    }

    pub fn generate(&self, req: GenerationRequest) -> Result<GenerationOutcome, GenerationError> {
        if req.due_date < req.today {
            return Err(GenerationError::Validation(
                "due date must not be in the past".to_string(),
            ));
        }
        if req.student_ids.is_empty() {
            return Err(GenerationError::Validation(
                "a generation run needs at least one student".to_string(),
            ));
        }

        let catalog_id = CatalogId::for_tenant(req.tenant_id);
        let catalog = self.rehydrate_catalog(req.tenant_id, catalog_id)?;

        // Resolve and price the cohort. A student the run cannot invoice is
        // reported, never fatal; the rest of the batch proceeds.
        let mut priced: Vec<PricedStudent> = Vec::with_capacity(req.student_ids.len());
        let mut skipped = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for student_id in &req.student_ids {
            if !seen.insert(*student_id) {
                continue;
            }
            let record = match self.directory.get(req.tenant_id, *student_id) {
                Some(record) => record,
                None => {
                    skipped.push(SkippedStudent {
                        student_id: *student_id,
                        reason: "student is not registered with this school".to_string(),
                    });
                    continue;
                }
            };

            // Zero-priced structures are valid catalog entries but carry no
            // charge line.
            let charges: Vec<InvoiceCharge> = catalog
                .applicable_fees(record.class_id, &req.academic_year)
                .into_iter()
                .filter(|f| !f.amount.is_zero())
                .map(|f| InvoiceCharge {
                    fee_head_id: f.fee_head_id,
                    amount: f.amount,
                })
                .collect();
            if charges.is_empty() {
                skipped.push(SkippedStudent {
                    student_id: *student_id,
                    reason: "no applicable fee structures for the student's class and academic year"
                        .to_string(),
                });
                continue;
            }

            priced.push(PricedStudent { record, charges });
        }

        if priced.is_empty() {
            return Ok(GenerationOutcome {
                invoices: vec![],
                skipped,
            });
        }

        // Lock every class we priced from before committing the batch, so a
        // re-pricing cannot slip in between pricing and commit. The aggregate
        // declines idempotently when a class/year is already locked.
        self.lock_classes(&req, catalog_id, &priced)?;

        let mut appends = Vec::with_capacity(priced.len());
        let mut generated = Vec::with_capacity(priced.len());
        let mut reserved = Vec::with_capacity(priced.len());

        for student in &priced {
            let invoice_number = match self.numbers.allocate(req.tenant_id) {
                Ok(n) => n,
                Err(e) => {
                    self.release_all(req.tenant_id, &reserved);
                    return Err(e.into());
                }
            };

            let invoice_id = InvoiceId::new(AggregateId::new());
            let raise = RaiseInvoice {
                tenant_id: req.tenant_id,
                invoice_id,
                student_id: student.record.student_id,
                class_id: student.record.class_id,
                invoice_number: invoice_number.clone(),
                academic_year: req.academic_year.clone(),
                charges: student.charges.clone(),
                due_date: req.due_date,
                occurred_at: req.now,
            };

            let aggregate = Invoice::empty(invoice_id);
            match aggregate.handle(&InvoiceCommand::RaiseInvoice(raise)) {
                Ok(events) => {
                    let total = events
                        .iter()
                        .find_map(|ev| match ev {
                            campusledger_invoicing::InvoiceEvent::InvoiceRaised(e) => {
                                Some(e.total_amount)
                            }
                            _ => None,
                        })
                        .unwrap_or(Money::ZERO);

                    let mut uncommitted = Vec::with_capacity(events.len());
                    for ev in &events {
                        match UncommittedEvent::from_typed(
                            req.tenant_id,
                            invoice_id.0,
                            "fees.invoice",
                            Uuid::now_v7(),
                            ev,
                        ) {
                            Ok(u) => uncommitted.push(u),
                            Err(e) => {
                                self.numbers.release(req.tenant_id, &invoice_number);
                                self.release_all(req.tenant_id, &reserved);
                                return Err(e.into());
                            }
                        }
                    }

                    appends.push(StreamAppend {
                        events: uncommitted,
                        expected_version: ExpectedVersion::Exact(0),
                    });
                    generated.push(GeneratedInvoice {
                        invoice_id,
                        student_id: student.record.student_id,
                        invoice_number: invoice_number.clone(),
                        total_amount: total,
                    });
                    reserved.push(invoice_number);
                }
                Err(e) => {
                    tracing::warn!(
                        student_id = %student.record.student_id,
                        error = %e,
                        "skipping student during invoice generation"
                    );
                    self.numbers.release(req.tenant_id, &invoice_number);
                    skipped.push(SkippedStudent {
                        student_id: student.record.student_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if generated.is_empty() {
            return Ok(GenerationOutcome {
                invoices: vec![],
                skipped,
            });
        }

        let stored = match self.store.append_batch(appends) {
            Ok(stored) => stored,
            Err(e) => {
                self.release_all(req.tenant_id, &reserved);
                return Err(e.into());
            }
        };

        for event in &stored {
            self.bus
                .publish(event.to_envelope())
                .map_err(|e| GenerationError::Publish(format!("{e:?}")))?;
        }

        tracing::info!(
            tenant_id = %req.tenant_id,
            academic_year = %req.academic_year,
            invoiced = generated.len(),
            skipped = skipped.len(),
            "invoice generation run committed"
        );

        Ok(GenerationOutcome {
            invoices: generated,
            skipped,
        })
    }

    fn lock_classes(
        &self,
        req: &GenerationRequest,
        catalog_id: CatalogId,
        priced: &[PricedStudent],
    ) -> Result<(), GenerationError> {
        let mut classes: Vec<ClassId> = priced.iter().map(|p| p.record.class_id).collect();
        classes.sort_by_key(|c| *c.as_uuid().as_bytes());
        classes.dedup();

        let dispatcher = CommandDispatcher::new(self.store.clone(), self.bus.clone());
        for class_id in classes {
            dispatcher
                .dispatch::<FeeCatalog>(
                    req.tenant_id,
                    catalog_id.0,
                    "fees.catalog",
                    CatalogCommand::RecordInvoiceRun(RecordInvoiceRun {
                        tenant_id: req.tenant_id,
                        class_id,
                        academic_year: req.academic_year.clone(),
                        occurred_at: req.now,
                    }),
                    |_, id| FeeCatalog::empty(CatalogId::new(id)),
                )
                .map_err(GenerationError::Dispatch)?;
        }
        Ok(())
    }

    fn rehydrate_catalog(
        &self,
        tenant_id: TenantId,
        catalog_id: CatalogId,
    ) -> Result<FeeCatalog, GenerationError> {
        let mut history = self.store.load_stream(tenant_id, catalog_id.0)?;
        history.sort_by_key(|e| e.sequence_number);

        let mut catalog = FeeCatalog::empty(catalog_id);
        for stored in history {
            let ev: CatalogEvent = serde_json::from_value(stored.payload).map_err(|e| {
                GenerationError::Dispatch(DispatchError::Deserialize(e.to_string()))
            })?;
            catalog.apply(&ev);
        }
        Ok(catalog)
    }

    fn release_all(&self, tenant_id: TenantId, reserved: &[InvoiceNumber]) {
        for number in reserved {
            self.numbers.release(tenant_id, number);
        }
    }
}
