//! Integration tests for the full event-sourced pipeline.
//!
//! Command → EventStore → EventBus → Projection → ReadModel, plus the
//! generation run, the overdue sweep, and the reporting summary on top.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use serde_json::Value as JsonValue;

    use campusledger_catalog::{
        AcademicYear, CatalogCommand, CatalogId, CreateFeeHead, FeeCatalog, FeeHeadId,
        FeeStructureId, SetFeeStructure,
    };
    use campusledger_core::{Money, TenantId, UserId};
    use campusledger_directory::{
        ClassId, InMemoryStudentDirectory, StudentId, StudentRecord,
    };
    use campusledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use campusledger_invoicing::{
        ApplyDiscount, Invoice, InvoiceCommand, InvoiceId, InvoiceStatus, PaymentMethod,
        SubmitPayment, TransactionId, VerifyPayment,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::InMemoryEventStore;
    use crate::generation::{GenerationError, GenerationRequest, InvoiceGenerator};
    use crate::invoice_numbers::InvoiceNumberAllocator;
    use crate::projections::catalog::{CatalogProjection, FeeHeadReadModel, FeeStructureReadModel};
    use crate::projections::invoices::{InvoiceReadModel, InvoicesProjection};
    use crate::read_model::InMemoryTenantStore;
    use crate::reporting::ReportingService;
    use crate::sweep::OverdueSweep;

    type Store = Arc<InMemoryEventStore>;
    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type InvoiceStores = Arc<InMemoryTenantStore<InvoiceId, InvoiceReadModel>>;
    type TxnIndex = Arc<InMemoryTenantStore<TransactionId, InvoiceId>>;
    type HeadStore = Arc<InMemoryTenantStore<FeeHeadId, FeeHeadReadModel>>;
    type StructureStore = Arc<InMemoryTenantStore<FeeStructureId, FeeStructureReadModel>>;

    struct Harness {
        store: Store,
        bus: Bus,
        directory: Arc<InMemoryStudentDirectory>,
        invoices: Arc<InvoicesProjection<InvoiceStores, TxnIndex>>,
        catalog: Arc<CatalogProjection<HeadStore, StructureStore>>,
        invoice_store: InvoiceStores,
        numbers: Arc<InvoiceNumberAllocator>,
    }

    impl Harness {
        fn dispatcher(&self) -> CommandDispatcher<Store, Bus> {
            CommandDispatcher::new(self.store.clone(), self.bus.clone())
        }

        fn generator(
            &self,
        ) -> InvoiceGenerator<Store, Bus, Arc<InMemoryStudentDirectory>> {
            InvoiceGenerator::new(
                self.store.clone(),
                self.bus.clone(),
                self.directory.clone(),
                self.numbers.clone(),
            )
        }

        fn sweep(&self) -> OverdueSweep<Store, Bus, InvoiceStores> {
            OverdueSweep::new(self.store.clone(), self.bus.clone(), self.invoice_store.clone())
        }

        fn reporting(&self) -> ReportingService<InvoiceStores> {
            ReportingService::new(self.invoice_store.clone())
        }
    }

    fn setup() -> Harness {
        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let directory = Arc::new(InMemoryStudentDirectory::new());

        let invoice_store: InvoiceStores = Arc::new(InMemoryTenantStore::new());
        let txn_index: TxnIndex = Arc::new(InMemoryTenantStore::new());
        let invoices = Arc::new(InvoicesProjection::new(invoice_store.clone(), txn_index));

        let head_store: HeadStore = Arc::new(InMemoryTenantStore::new());
        let structure_store: StructureStore = Arc::new(InMemoryTenantStore::new());
        let catalog = Arc::new(CatalogProjection::new(head_store, structure_store));

        // Subscribe to the bus BEFORE any events are published.
        let invoices_clone = invoices.clone();
        let catalog_clone = catalog.clone();
        let bus_clone = bus.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            let sub = bus_clone.subscribe();
            let _ = ready_tx.send(());
            while let Ok(env) = sub.recv() {
                if let Err(e) = invoices_clone.apply_envelope(&env) {
                    eprintln!("failed to apply invoice envelope: {e:?}");
                }
                if let Err(e) = catalog_clone.apply_envelope(&env) {
                    eprintln!("failed to apply catalog envelope: {e:?}");
                }
            }
        });
        let _ = ready_rx.recv_timeout(std::time::Duration::from_secs(1));

        Harness {
            store,
            bus,
            directory,
            invoices,
            catalog,
            invoice_store,
            numbers: Arc::new(InvoiceNumberAllocator::new()),
        }
    }

    /// The subscriber thread processes events asynchronously; give it a beat.
    fn wait_for_processing() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    fn year() -> AcademicYear {
        AcademicYear::new("2026-27").unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 30).unwrap()
    }

    fn due_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 30).unwrap()
    }

    /// Seed a tenant with one active fee head priced for the class.
    fn seed_catalog(h: &Harness, tenant_id: TenantId, class_id: ClassId, amount_minor: u64) {
        let dispatcher = h.dispatcher();
        let catalog_id = CatalogId::for_tenant(tenant_id);
        let fee_head_id = FeeHeadId::new();

        dispatcher
            .dispatch::<FeeCatalog>(
                tenant_id,
                catalog_id.0,
                "fees.catalog",
                CatalogCommand::CreateFeeHead(CreateFeeHead {
                    tenant_id,
                    fee_head_id,
                    name: "Tuition".to_string(),
                    description: "Term tuition".to_string(),
                    occurred_at: Utc::now(),
                }),
                |_, id| FeeCatalog::empty(CatalogId::new(id)),
            )
            .unwrap();

        dispatcher
            .dispatch::<FeeCatalog>(
                tenant_id,
                catalog_id.0,
                "fees.catalog",
                CatalogCommand::SetFeeStructure(SetFeeStructure {
                    tenant_id,
                    structure_id: FeeStructureId::new(),
                    class_id,
                    fee_head_id,
                    amount: Money::from_minor(amount_minor),
                    academic_year: year(),
                    occurred_at: Utc::now(),
                }),
                |_, id| FeeCatalog::empty(CatalogId::new(id)),
            )
            .unwrap();
    }

    fn enroll(h: &Harness, tenant_id: TenantId, class_id: ClassId, name: &str) -> StudentId {
        let student_id = StudentId::new();
        h.directory.upsert(StudentRecord {
            student_id,
            tenant_id,
            class_id,
            full_name: name.to_string(),
        });
        student_id
    }

    fn generate(
        h: &Harness,
        tenant_id: TenantId,
        student_ids: &[StudentId],
    ) -> Result<crate::generation::GenerationOutcome, GenerationError> {
        h.generator().generate(GenerationRequest {
            tenant_id,
            student_ids: student_ids.to_vec(),
            academic_year: year(),
            due_date: due_date(),
            today: today(),
            now: Utc::now(),
        })
    }

    fn submit_payment(
        h: &Harness,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        amount_minor: u64,
    ) -> TransactionId {
        let transaction_id = TransactionId::new();
        h.dispatcher()
            .dispatch::<Invoice>(
                tenant_id,
                invoice_id.0,
                "fees.invoice",
                InvoiceCommand::SubmitPayment(SubmitPayment {
                    tenant_id,
                    invoice_id,
                    transaction_id,
                    amount: Money::from_minor(amount_minor),
                    method: PaymentMethod::Upi,
                    reference: Some("UTR123456789".to_string()),
                    occurred_at: Utc::now(),
                }),
                |_, id| Invoice::empty(InvoiceId::new(id)),
            )
            .unwrap();
        transaction_id
    }

    fn verify_payment(
        h: &Harness,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        transaction_id: TransactionId,
    ) -> Result<usize, DispatchError> {
        h.dispatcher()
            .dispatch::<Invoice>(
                tenant_id,
                invoice_id.0,
                "fees.invoice",
                InvoiceCommand::VerifyPayment(VerifyPayment {
                    tenant_id,
                    invoice_id,
                    transaction_id,
                    reviewed_by: UserId::new(),
                    occurred_at: Utc::now(),
                }),
                |_, id| Invoice::empty(InvoiceId::new(id)),
            )
            .map(|committed| committed.len())
    }

    #[test]
    fn generation_invoices_the_cohort_and_locks_pricing() {
        let h = setup();
        let tenant_id = TenantId::new();
        let class_id = ClassId::new();
        seed_catalog(&h, tenant_id, class_id, 500_000);
        let asha = enroll(&h, tenant_id, class_id, "Asha Rao");
        let vikram = enroll(&h, tenant_id, class_id, "Vikram Iyer");

        let outcome = generate(&h, tenant_id, &[asha, vikram]).unwrap();
        assert_eq!(outcome.invoices.len(), 2);
        assert!(outcome.skipped.is_empty());
        assert_ne!(
            outcome.invoices[0].invoice_number,
            outcome.invoices[1].invoice_number
        );

        wait_for_processing();
        let listed = h.invoices.list(tenant_id);
        assert_eq!(listed.len(), 2);
        for rm in &listed {
            assert_eq!(rm.status, InvoiceStatus::Pending);
            assert_eq!(rm.total_amount, Money::from_minor(500_000));
        }

        // The run freezes pricing for the invoiced class/year.
        let catalog_id = CatalogId::for_tenant(tenant_id);
        let structures = h.catalog.list_structures(tenant_id);
        assert!(structures.iter().all(|s| s.locked));
        let err = h
            .dispatcher()
            .dispatch::<FeeCatalog>(
                tenant_id,
                catalog_id.0,
                "fees.catalog",
                CatalogCommand::SetFeeStructure(SetFeeStructure {
                    tenant_id,
                    structure_id: FeeStructureId::new(),
                    class_id,
                    fee_head_id: structures[0].fee_head_id,
                    amount: Money::from_minor(600_000),
                    academic_year: year(),
                    occurred_at: Utc::now(),
                }),
                |_, id| FeeCatalog::empty(CatalogId::new(id)),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::ImmutableState(_)));
    }

    #[test]
    fn late_admissions_can_be_invoiced_after_the_first_run() {
        let h = setup();
        let tenant_id = TenantId::new();
        let class_id = ClassId::new();
        seed_catalog(&h, tenant_id, class_id, 500_000);
        let asha = enroll(&h, tenant_id, class_id, "Asha Rao");

        generate(&h, tenant_id, &[asha]).unwrap();

        // A student admitted after the first run gets an invoice at the
        // frozen rate.
        let late = enroll(&h, tenant_id, class_id, "Meera Pillai");
        let outcome = generate(&h, tenant_id, &[late]).unwrap();
        assert_eq!(outcome.invoices.len(), 1);
        assert_eq!(outcome.invoices[0].student_id, late);
        assert_eq!(outcome.invoices[0].total_amount, Money::from_minor(500_000));

        wait_for_processing();
        assert_eq!(h.invoices.list(tenant_id).len(), 2);
        assert!(h.catalog.list_structures(tenant_id).iter().all(|s| s.locked));
    }

    #[test]
    fn generation_rejects_past_due_dates_and_empty_cohorts() {
        let h = setup();
        let tenant_id = TenantId::new();
        let class_id = ClassId::new();
        seed_catalog(&h, tenant_id, class_id, 500_000);
        let asha = enroll(&h, tenant_id, class_id, "Asha Rao");

        let err = h
            .generator()
            .generate(GenerationRequest {
                tenant_id,
                student_ids: vec![asha],
                academic_year: year(),
                due_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                today: today(),
                now: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));

        let err = generate(&h, tenant_id, &[]).unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
    }

    #[test]
    fn students_without_pricing_are_skipped_not_fatal() {
        let h = setup();
        let tenant_id = TenantId::new();
        let class_id = ClassId::new();
        seed_catalog(&h, tenant_id, class_id, 500_000);
        let asha = enroll(&h, tenant_id, class_id, "Asha Rao");
        // Enrolled, but the class has no fee structures for the year.
        let unpriced = enroll(&h, tenant_id, ClassId::new(), "Ravi Menon");
        let unknown = StudentId::new();

        let outcome = generate(&h, tenant_id, &[asha, unpriced, unknown]).unwrap();
        assert_eq!(outcome.invoices.len(), 1);
        assert_eq!(outcome.invoices[0].student_id, asha);

        let skipped_ids: Vec<_> = outcome.skipped.iter().map(|s| s.student_id).collect();
        assert_eq!(skipped_ids, vec![unpriced, unknown]);

        // A cohort where nobody can be priced is a no-op run, not an error.
        let outcome = generate(&h, tenant_id, &[unknown]).unwrap();
        assert!(outcome.invoices.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
    }

    #[test]
    fn payment_flow_updates_read_models_and_summary() {
        let h = setup();
        let tenant_id = TenantId::new();
        let class_id = ClassId::new();
        seed_catalog(&h, tenant_id, class_id, 500_000);
        let asha = enroll(&h, tenant_id, class_id, "Asha Rao");

        let outcome = generate(&h, tenant_id, &[asha]).unwrap();
        let invoice_id = outcome.invoices[0].invoice_id;

        h.dispatcher()
            .dispatch::<Invoice>(
                tenant_id,
                invoice_id.0,
                "fees.invoice",
                InvoiceCommand::ApplyDiscount(ApplyDiscount {
                    tenant_id,
                    invoice_id,
                    discount: Money::from_minor(100_000),
                    occurred_at: Utc::now(),
                }),
                |_, id| Invoice::empty(InvoiceId::new(id)),
            )
            .unwrap();

        let txn = submit_payment(&h, tenant_id, invoice_id, 400_000);
        assert_eq!(verify_payment(&h, tenant_id, invoice_id, txn).unwrap(), 1);

        wait_for_processing();
        let rm = h.invoices.get(tenant_id, &invoice_id).unwrap();
        assert_eq!(rm.status, InvoiceStatus::Paid);
        assert_eq!(rm.net_amount(), Money::from_minor(400_000));
        assert_eq!(rm.outstanding_amount(), Money::ZERO);

        // The claim is reachable through the transaction index.
        let by_txn = h.invoices.find_by_transaction(tenant_id, &txn).unwrap();
        assert_eq!(by_txn.invoice_id, invoice_id);

        let summary = h.reporting().summarize(tenant_id);
        assert_eq!(summary.invoice_count, 1);
        assert_eq!(summary.total_invoiced, Money::from_minor(400_000));
        assert_eq!(summary.total_collected, Money::from_minor(400_000));
        assert_eq!(summary.total_pending, Money::ZERO);
    }

    #[test]
    fn discount_after_partial_payment_settles_the_read_model() {
        let h = setup();
        let tenant_id = TenantId::new();
        let class_id = ClassId::new();
        seed_catalog(&h, tenant_id, class_id, 500_000);
        let asha = enroll(&h, tenant_id, class_id, "Asha Rao");

        let outcome = generate(&h, tenant_id, &[asha]).unwrap();
        let invoice_id = outcome.invoices[0].invoice_id;

        let txn = submit_payment(&h, tenant_id, invoice_id, 400_000);
        verify_payment(&h, tenant_id, invoice_id, txn).unwrap();
        wait_for_processing();
        assert_eq!(
            h.invoices.get(tenant_id, &invoice_id).unwrap().status,
            InvoiceStatus::PartiallyPaid
        );

        // Waiving the remainder closes the invoice.
        h.dispatcher()
            .dispatch::<Invoice>(
                tenant_id,
                invoice_id.0,
                "fees.invoice",
                InvoiceCommand::ApplyDiscount(ApplyDiscount {
                    tenant_id,
                    invoice_id,
                    discount: Money::from_minor(100_000),
                    occurred_at: Utc::now(),
                }),
                |_, id| Invoice::empty(InvoiceId::new(id)),
            )
            .unwrap();

        wait_for_processing();
        let rm = h.invoices.get(tenant_id, &invoice_id).unwrap();
        assert_eq!(rm.status, InvoiceStatus::Paid);
        assert_eq!(rm.outstanding_amount(), Money::ZERO);
    }

    #[test]
    fn concurrent_verification_settles_the_invoice_exactly_once() {
        let h = setup();
        let tenant_id = TenantId::new();
        let class_id = ClassId::new();
        seed_catalog(&h, tenant_id, class_id, 500_000);
        let asha = enroll(&h, tenant_id, class_id, "Asha Rao");

        let outcome = generate(&h, tenant_id, &[asha]).unwrap();
        let invoice_id = outcome.invoices[0].invoice_id;

        // Two full-amount claims from racing payers.
        let first = submit_payment(&h, tenant_id, invoice_id, 500_000);
        let second = submit_payment(&h, tenant_id, invoice_id, 500_000);

        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|txn| {
                let store = h.store.clone();
                let bus = h.bus.clone();
                std::thread::spawn(move || {
                    let dispatcher = CommandDispatcher::new(store, bus);
                    // Retry on optimistic concurrency; the domain decision
                    // (invariant violation) is terminal.
                    loop {
                        let result = dispatcher.dispatch::<Invoice>(
                            tenant_id,
                            invoice_id.0,
                            "fees.invoice",
                            InvoiceCommand::VerifyPayment(VerifyPayment {
                                tenant_id,
                                invoice_id,
                                transaction_id: txn,
                                reviewed_by: UserId::new(),
                                occurred_at: Utc::now(),
                            }),
                            |_, id| Invoice::empty(InvoiceId::new(id)),
                        );
                        match result {
                            Err(DispatchError::Concurrency(_)) => continue,
                            other => return other.map(|committed| committed.len()),
                        }
                    }
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|j| j.join().unwrap()).collect();
        let verified = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(DispatchError::InvariantViolation(_))))
            .count();
        assert_eq!(verified, 1);
        assert_eq!(refused, 1);

        wait_for_processing();
        let rm = h.invoices.get(tenant_id, &invoice_id).unwrap();
        assert_eq!(rm.status, InvoiceStatus::Paid);
        assert_eq!(rm.verified_amount, Money::from_minor(500_000));
    }

    #[test]
    fn sweep_marks_past_due_invoices_and_is_idempotent() {
        let h = setup();
        let tenant_id = TenantId::new();
        let class_id = ClassId::new();
        seed_catalog(&h, tenant_id, class_id, 500_000);
        let asha = enroll(&h, tenant_id, class_id, "Asha Rao");
        let vikram = enroll(&h, tenant_id, class_id, "Vikram Iyer");

        let outcome = generate(&h, tenant_id, &[asha, vikram]).unwrap();
        let settled_id = outcome.invoices[0].invoice_id;

        // Settle one invoice so only the other is a sweep candidate.
        let txn = submit_payment(&h, tenant_id, settled_id, 500_000);
        verify_payment(&h, tenant_id, settled_id, txn).unwrap();
        wait_for_processing();

        let past_due = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let first = h.sweep().run(tenant_id, past_due, Utc::now());
        assert_eq!(first.marked, 1);
        assert_eq!(first.failed, 0);

        wait_for_processing();
        let overdue: Vec<_> = h
            .invoices
            .list(tenant_id)
            .into_iter()
            .filter(|rm| rm.status == InvoiceStatus::Overdue)
            .collect();
        assert_eq!(overdue.len(), 1);

        // Re-running the sweep changes nothing.
        let second = h.sweep().run(tenant_id, past_due, Utc::now());
        assert_eq!(second.marked, 0);
        assert_eq!(second.failed, 0);

        let summary = h.reporting().summarize(tenant_id);
        assert_eq!(summary.overdue_count, 1);
        assert_eq!(summary.total_pending, Money::from_minor(500_000));
    }

    #[test]
    fn read_models_are_tenant_isolated() {
        let h = setup();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let class_id = ClassId::new();
        seed_catalog(&h, tenant_a, class_id, 500_000);
        let asha = enroll(&h, tenant_a, class_id, "Asha Rao");

        generate(&h, tenant_a, &[asha]).unwrap();
        wait_for_processing();

        assert_eq!(h.invoices.list(tenant_a).len(), 1);
        assert!(h.invoices.list(tenant_b).is_empty());
        assert!(h.catalog.list_heads(tenant_b).is_empty());
        assert_eq!(h.reporting().summarize(tenant_b).invoice_count, 0);
    }
}
