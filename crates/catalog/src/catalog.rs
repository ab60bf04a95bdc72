use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campusledger_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId, impl_uuid_newtype,
};
use campusledger_directory::ClassId;
use campusledger_events::Event;

use crate::year::AcademicYear;

/// Catalog identifier. Each school has exactly one catalog stream, keyed by
/// the tenant's own uuid so all catalog mutations for a school serialize.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogId(pub AggregateId);

impl CatalogId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self(AggregateId::from_uuid(*tenant_id.as_uuid()))
    }
}

impl core::fmt::Display for CatalogId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a fee head (charge category such as "Tuition").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeHeadId(uuid::Uuid);

/// Identifier of a fee structure row (class + head + year → amount).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeStructureId(uuid::Uuid);

impl_uuid_newtype!(FeeHeadId, "FeeHeadId");
impl_uuid_newtype!(FeeStructureId, "FeeStructureId");

#[derive(Debug, Clone, PartialEq, Eq)]
struct FeeHeadState {
    name: String,
    description: String,
    active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StructureState {
    structure_id: FeeStructureId,
    amount: Money,
}

/// A priced charge applicable to a class for an academic year, as the invoice
/// engine consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicableFee {
    pub fee_head_id: FeeHeadId,
    pub amount: Money,
}

/// Aggregate root: FeeCatalog (one per school).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeCatalog {
    id: CatalogId,
    tenant_id: Option<TenantId>,
    heads: HashMap<FeeHeadId, FeeHeadState>,
    structures: HashMap<(ClassId, FeeHeadId, AcademicYear), StructureState>,
    invoiced: HashSet<(ClassId, AcademicYear)>,
    version: u64,
    created: bool,
}

impl FeeCatalog {
    /// Empty aggregate for rehydration.
    pub fn empty(id: CatalogId) -> Self {
        Self {
            id,
            tenant_id: None,
            heads: HashMap::new(),
            structures: HashMap::new(),
            invoiced: HashSet::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CatalogId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn head_is_active(&self, fee_head_id: FeeHeadId) -> bool {
        self.heads.get(&fee_head_id).is_some_and(|h| h.active)
    }

    /// Whether invoices have already been generated for this class/year.
    pub fn is_invoiced(&self, class_id: ClassId, year: &AcademicYear) -> bool {
        self.invoiced.contains(&(class_id, year.clone()))
    }

    /// Priced charges for a class/year, restricted to active fee heads.
    ///
    /// Sorted by fee head id so generated invoices have deterministic line
    /// order.
    pub fn applicable_fees(&self, class_id: ClassId, year: &AcademicYear) -> Vec<ApplicableFee> {
        let mut fees: Vec<ApplicableFee> = self
            .structures
            .iter()
            .filter(|((cls, head, yr), _)| {
                *cls == class_id && yr == year && self.head_is_active(*head)
            })
            .map(|((_, head, _), s)| ApplicableFee {
                fee_head_id: *head,
                amount: s.amount,
            })
            .collect();
        fees.sort_by(|a, b| a.fee_head_id.as_uuid().cmp(b.fee_head_id.as_uuid()));
        fees
    }
}

impl AggregateRoot for FeeCatalog {
    type Id = CatalogId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateFeeHead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFeeHead {
    pub tenant_id: TenantId,
    pub fee_head_id: FeeHeadId,
    pub name: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateFeeHead (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateFeeHead {
    pub tenant_id: TenantId,
    pub fee_head_id: FeeHeadId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetFeeStructure (upsert of the amount for class + head + year).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFeeStructure {
    pub tenant_id: TenantId,
    pub structure_id: FeeStructureId,
    pub class_id: ClassId,
    pub fee_head_id: FeeHeadId,
    pub amount: Money,
    pub academic_year: AcademicYear,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordInvoiceRun. Freezes fee structures for the class/year once
/// invoices have been priced from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordInvoiceRun {
    pub tenant_id: TenantId,
    pub class_id: ClassId,
    pub academic_year: AcademicYear,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogCommand {
    CreateFeeHead(CreateFeeHead),
    DeactivateFeeHead(DeactivateFeeHead),
    SetFeeStructure(SetFeeStructure),
    RecordInvoiceRun(RecordInvoiceRun),
}

/// Event: FeeHeadCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeHeadCreated {
    pub tenant_id: TenantId,
    pub fee_head_id: FeeHeadId,
    pub name: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FeeHeadDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeHeadDeactivated {
    pub tenant_id: TenantId,
    pub fee_head_id: FeeHeadId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FeeStructureSet. `structure_id` is stable across re-pricings of the
/// same class + head + year key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStructureSet {
    pub tenant_id: TenantId,
    pub structure_id: FeeStructureId,
    pub class_id: ClassId,
    pub fee_head_id: FeeHeadId,
    pub amount: Money,
    pub academic_year: AcademicYear,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceRunRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRunRecorded {
    pub tenant_id: TenantId,
    pub class_id: ClassId,
    pub academic_year: AcademicYear,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogEvent {
    FeeHeadCreated(FeeHeadCreated),
    FeeHeadDeactivated(FeeHeadDeactivated),
    FeeStructureSet(FeeStructureSet),
    InvoiceRunRecorded(InvoiceRunRecorded),
}

impl Event for CatalogEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CatalogEvent::FeeHeadCreated(_) => "fees.catalog.fee_head_created",
            CatalogEvent::FeeHeadDeactivated(_) => "fees.catalog.fee_head_deactivated",
            CatalogEvent::FeeStructureSet(_) => "fees.catalog.fee_structure_set",
            CatalogEvent::InvoiceRunRecorded(_) => "fees.catalog.invoice_run_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CatalogEvent::FeeHeadCreated(e) => e.occurred_at,
            CatalogEvent::FeeHeadDeactivated(e) => e.occurred_at,
            CatalogEvent::FeeStructureSet(e) => e.occurred_at,
            CatalogEvent::InvoiceRunRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for FeeCatalog {
    type Command = CatalogCommand;
    type Event = CatalogEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CatalogEvent::FeeHeadCreated(e) => {
                if self.tenant_id.is_none() {
                    self.tenant_id = Some(e.tenant_id);
                    self.created = true;
                }
                self.heads.insert(
                    e.fee_head_id,
                    FeeHeadState {
                        name: e.name.clone(),
                        description: e.description.clone(),
                        active: true,
                    },
                );
            }
            CatalogEvent::FeeHeadDeactivated(e) => {
                if let Some(head) = self.heads.get_mut(&e.fee_head_id) {
                    head.active = false;
                }
            }
            CatalogEvent::FeeStructureSet(e) => {
                if self.tenant_id.is_none() {
                    self.tenant_id = Some(e.tenant_id);
                    self.created = true;
                }
                self.structures.insert(
                    (e.class_id, e.fee_head_id, e.academic_year.clone()),
                    StructureState {
                        structure_id: e.structure_id,
                        amount: e.amount,
                    },
                );
            }
            CatalogEvent::InvoiceRunRecorded(e) => {
                self.invoiced.insert((e.class_id, e.academic_year.clone()));
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CatalogCommand::CreateFeeHead(cmd) => self.handle_create_head(cmd),
            CatalogCommand::DeactivateFeeHead(cmd) => self.handle_deactivate_head(cmd),
            CatalogCommand::SetFeeStructure(cmd) => self.handle_set_structure(cmd),
            CatalogCommand::RecordInvoiceRun(cmd) => self.handle_record_run(cmd),
        }
    }
}

impl FeeCatalog {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_create_head(&self, cmd: &CreateFeeHead) -> Result<Vec<CatalogEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("fee head name must not be empty"));
        }
        if self.heads.contains_key(&cmd.fee_head_id) {
            return Err(DomainError::conflict("fee head id already exists"));
        }
        let duplicate = self
            .heads
            .values()
            .any(|h| h.active && h.name.eq_ignore_ascii_case(name));
        if duplicate {
            return Err(DomainError::conflict(format!(
                "an active fee head named '{name}' already exists"
            )));
        }

        Ok(vec![CatalogEvent::FeeHeadCreated(FeeHeadCreated {
            tenant_id: cmd.tenant_id,
            fee_head_id: cmd.fee_head_id,
            name: name.to_string(),
            description: cmd.description.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate_head(
        &self,
        cmd: &DeactivateFeeHead,
    ) -> Result<Vec<CatalogEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        match self.heads.get(&cmd.fee_head_id) {
            Some(head) if head.active => {}
            // Absent and already-inactive heads look the same to the caller.
            _ => return Err(DomainError::not_found()),
        }

        Ok(vec![CatalogEvent::FeeHeadDeactivated(FeeHeadDeactivated {
            tenant_id: cmd.tenant_id,
            fee_head_id: cmd.fee_head_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_structure(
        &self,
        cmd: &SetFeeStructure,
    ) -> Result<Vec<CatalogEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;

        if !self.head_is_active(cmd.fee_head_id) {
            return Err(DomainError::validation(
                "fee structure references a missing or inactive fee head",
            ));
        }
        if self.is_invoiced(cmd.class_id, &cmd.academic_year) {
            return Err(DomainError::immutable(format!(
                "fee structures for academic year {} are frozen: invoices were already generated for this class",
                cmd.academic_year
            )));
        }

        // Re-pricing an existing key keeps its structure id stable.
        let key = (cmd.class_id, cmd.fee_head_id, cmd.academic_year.clone());
        let structure_id = self
            .structures
            .get(&key)
            .map(|s| s.structure_id)
            .unwrap_or(cmd.structure_id);

        Ok(vec![CatalogEvent::FeeStructureSet(FeeStructureSet {
            tenant_id: cmd.tenant_id,
            structure_id,
            class_id: cmd.class_id,
            fee_head_id: cmd.fee_head_id,
            amount: cmd.amount,
            academic_year: cmd.academic_year.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_run(&self, cmd: &RecordInvoiceRun) -> Result<Vec<CatalogEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        // Idempotent: repeated runs for the same class/year change nothing.
        if self.is_invoiced(cmd.class_id, &cmd.academic_year) {
            return Ok(vec![]);
        }

        Ok(vec![CatalogEvent::InvoiceRunRecorded(InvoiceRunRecorded {
            tenant_id: cmd.tenant_id,
            class_id: cmd.class_id,
            academic_year: cmd.academic_year.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn year() -> AcademicYear {
        AcademicYear::new("2025-26").unwrap()
    }

    fn catalog_with_head(tenant_id: TenantId, fee_head_id: FeeHeadId) -> FeeCatalog {
        let mut catalog = FeeCatalog::empty(CatalogId::for_tenant(tenant_id));
        let events = catalog
            .handle(&CatalogCommand::CreateFeeHead(CreateFeeHead {
                tenant_id,
                fee_head_id,
                name: "Tuition".to_string(),
                description: "Term tuition".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            catalog.apply(e);
        }
        catalog
    }

    fn apply_all(catalog: &mut FeeCatalog, events: Vec<CatalogEvent>) {
        for e in &events {
            catalog.apply(e);
        }
    }

    #[test]
    fn duplicate_active_head_name_is_rejected() {
        let tenant_id = test_tenant_id();
        let catalog = catalog_with_head(tenant_id, FeeHeadId::new());

        let err = catalog
            .handle(&CatalogCommand::CreateFeeHead(CreateFeeHead {
                tenant_id,
                fee_head_id: FeeHeadId::new(),
                name: "tuition".to_string(),
                description: String::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn name_can_be_reused_after_deactivation() {
        let tenant_id = test_tenant_id();
        let head = FeeHeadId::new();
        let mut catalog = catalog_with_head(tenant_id, head);

        let events = catalog
            .handle(&CatalogCommand::DeactivateFeeHead(DeactivateFeeHead {
                tenant_id,
                fee_head_id: head,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut catalog, events);

        let events = catalog
            .handle(&CatalogCommand::CreateFeeHead(CreateFeeHead {
                tenant_id,
                fee_head_id: FeeHeadId::new(),
                name: "Tuition".to_string(),
                description: String::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn deactivating_missing_or_inactive_head_is_not_found() {
        let tenant_id = test_tenant_id();
        let head = FeeHeadId::new();
        let mut catalog = catalog_with_head(tenant_id, head);

        let err = catalog
            .handle(&CatalogCommand::DeactivateFeeHead(DeactivateFeeHead {
                tenant_id,
                fee_head_id: FeeHeadId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);

        let events = catalog
            .handle(&CatalogCommand::DeactivateFeeHead(DeactivateFeeHead {
                tenant_id,
                fee_head_id: head,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut catalog, events);

        let err = catalog
            .handle(&CatalogCommand::DeactivateFeeHead(DeactivateFeeHead {
                tenant_id,
                fee_head_id: head,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn structure_for_unknown_head_is_rejected() {
        let tenant_id = test_tenant_id();
        let catalog = catalog_with_head(tenant_id, FeeHeadId::new());

        let err = catalog
            .handle(&CatalogCommand::SetFeeStructure(SetFeeStructure {
                tenant_id,
                structure_id: FeeStructureId::new(),
                class_id: ClassId::new(),
                fee_head_id: FeeHeadId::new(),
                amount: Money::from_minor(500_000),
                academic_year: year(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn upsert_replaces_amount_and_keeps_structure_id() {
        let tenant_id = test_tenant_id();
        let head = FeeHeadId::new();
        let class = ClassId::new();
        let mut catalog = catalog_with_head(tenant_id, head);

        let first = SetFeeStructure {
            tenant_id,
            structure_id: FeeStructureId::new(),
            class_id: class,
            fee_head_id: head,
            amount: Money::from_minor(500_000),
            academic_year: year(),
            occurred_at: test_time(),
        };
        let events = catalog
            .handle(&CatalogCommand::SetFeeStructure(first.clone()))
            .unwrap();
        apply_all(&mut catalog, events);

        let second = SetFeeStructure {
            structure_id: FeeStructureId::new(),
            amount: Money::from_minor(550_000),
            ..first.clone()
        };
        let events = catalog
            .handle(&CatalogCommand::SetFeeStructure(second))
            .unwrap();
        match &events[0] {
            CatalogEvent::FeeStructureSet(e) => {
                assert_eq!(e.structure_id, first.structure_id);
                assert_eq!(e.amount, Money::from_minor(550_000));
            }
            other => panic!("expected FeeStructureSet, got {other:?}"),
        }
        apply_all(&mut catalog, events);

        let fees = catalog.applicable_fees(class, &year());
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].amount, Money::from_minor(550_000));
    }

    #[test]
    fn zero_amount_structure_is_accepted() {
        // Waived fees are modelled as zero-amount structures; pricing drops
        // them from invoices downstream.
        let tenant_id = test_tenant_id();
        let head = FeeHeadId::new();
        let class = ClassId::new();
        let mut catalog = catalog_with_head(tenant_id, head);

        let events = catalog
            .handle(&CatalogCommand::SetFeeStructure(SetFeeStructure {
                tenant_id,
                structure_id: FeeStructureId::new(),
                class_id: class,
                fee_head_id: head,
                amount: Money::ZERO,
                academic_year: year(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut catalog, events);

        let fees = catalog.applicable_fees(class, &year());
        assert_eq!(fees.len(), 1);
        assert!(fees[0].amount.is_zero());
    }

    #[test]
    fn structures_freeze_after_invoice_run() {
        let tenant_id = test_tenant_id();
        let head = FeeHeadId::new();
        let class = ClassId::new();
        let mut catalog = catalog_with_head(tenant_id, head);

        let events = catalog
            .handle(&CatalogCommand::SetFeeStructure(SetFeeStructure {
                tenant_id,
                structure_id: FeeStructureId::new(),
                class_id: class,
                fee_head_id: head,
                amount: Money::from_minor(500_000),
                academic_year: year(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut catalog, events);

        let events = catalog
            .handle(&CatalogCommand::RecordInvoiceRun(RecordInvoiceRun {
                tenant_id,
                class_id: class,
                academic_year: year(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
        apply_all(&mut catalog, events);

        let err = catalog
            .handle(&CatalogCommand::SetFeeStructure(SetFeeStructure {
                tenant_id,
                structure_id: FeeStructureId::new(),
                class_id: class,
                fee_head_id: head,
                amount: Money::from_minor(600_000),
                academic_year: year(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::ImmutableState(_)));

        // A different year for the same class is still open.
        let other_year = AcademicYear::new("2026-27").unwrap();
        assert!(
            catalog
                .handle(&CatalogCommand::SetFeeStructure(SetFeeStructure {
                    tenant_id,
                    structure_id: FeeStructureId::new(),
                    class_id: class,
                    fee_head_id: head,
                    amount: Money::from_minor(600_000),
                    academic_year: other_year,
                    occurred_at: test_time(),
                }))
                .is_ok()
        );
    }

    #[test]
    fn repeated_invoice_run_is_a_no_op() {
        let tenant_id = test_tenant_id();
        let class = ClassId::new();
        let mut catalog = catalog_with_head(tenant_id, FeeHeadId::new());

        let events = catalog
            .handle(&CatalogCommand::RecordInvoiceRun(RecordInvoiceRun {
                tenant_id,
                class_id: class,
                academic_year: year(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut catalog, events);

        let events = catalog
            .handle(&CatalogCommand::RecordInvoiceRun(RecordInvoiceRun {
                tenant_id,
                class_id: class,
                academic_year: year(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn deactivated_heads_drop_out_of_applicable_fees() {
        let tenant_id = test_tenant_id();
        let head = FeeHeadId::new();
        let class = ClassId::new();
        let mut catalog = catalog_with_head(tenant_id, head);

        let events = catalog
            .handle(&CatalogCommand::SetFeeStructure(SetFeeStructure {
                tenant_id,
                structure_id: FeeStructureId::new(),
                class_id: class,
                fee_head_id: head,
                amount: Money::from_minor(120_000),
                academic_year: year(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut catalog, events);
        assert_eq!(catalog.applicable_fees(class, &year()).len(), 1);

        let events = catalog
            .handle(&CatalogCommand::DeactivateFeeHead(DeactivateFeeHead {
                tenant_id,
                fee_head_id: head,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut catalog, events);
        assert!(catalog.applicable_fees(class, &year()).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any sequence of upserts for the same key leaves exactly
        /// one applicable fee, priced at the last accepted amount.
        #[test]
        fn last_upsert_wins(amounts in prop::collection::vec(1u64..10_000_000u64, 1..10)) {
            let tenant_id = test_tenant_id();
            let head = FeeHeadId::new();
            let class = ClassId::new();
            let mut catalog = catalog_with_head(tenant_id, head);

            let mut last = 0u64;
            for amount in amounts {
                let events = catalog
                    .handle(&CatalogCommand::SetFeeStructure(SetFeeStructure {
                        tenant_id,
                        structure_id: FeeStructureId::new(),
                        class_id: class,
                        fee_head_id: head,
                        amount: Money::from_minor(amount),
                        academic_year: year(),
                        occurred_at: test_time(),
                    }))
                    .unwrap();
                for e in &events {
                    catalog.apply(e);
                }
                last = amount;
            }

            let fees = catalog.applicable_fees(class, &year());
            prop_assert_eq!(fees.len(), 1);
            prop_assert_eq!(fees[0].amount, Money::from_minor(last));
        }
    }
}
