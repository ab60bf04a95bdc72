use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use campusledger_catalog::{AcademicYear, FeeHeadId};
use campusledger_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId, UserId, impl_uuid_newtype,
};
use campusledger_directory::{ClassId, StudentId};
use campusledger_events::Event;

/// Invoice identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a payment claim, assigned at submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(uuid::Uuid);

impl_uuid_newtype!(TransactionId, "TransactionId");

/// Human-facing invoice number; opaque, unique across all tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceNumber(String);

impl InvoiceNumber {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

/// How a payment claim was settled by the payer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// UPI transfer; the claim must carry the 12-char UTR settlement
    /// reference for back-office verification.
    Upi,
    /// Cash handed over at the school office.
    Cash,
}

/// Review state of a payment claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Submitted,
    Verified,
    Rejected,
}

/// One priced charge line on an invoice, derived from a fee structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCharge {
    pub fee_head_id: FeeHeadId,
    pub amount: Money,
}

/// A payment claim recorded against the invoice.
///
/// Claims only count toward the invoice once verified; rejected claims remain
/// in the history for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentClaim {
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub status: ClaimStatus,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reject_reason: Option<String>,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    student_id: Option<StudentId>,
    class_id: Option<ClassId>,
    invoice_number: Option<InvoiceNumber>,
    academic_year: Option<AcademicYear>,
    charges: Vec<InvoiceCharge>,
    total_amount: Money,
    discount_amount: Money,
    due_date: Option<NaiveDate>,
    status: InvoiceStatus,
    claims: Vec<PaymentClaim>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            student_id: None,
            class_id: None,
            invoice_number: None,
            academic_year: None,
            charges: Vec::new(),
            total_amount: Money::ZERO,
            discount_amount: Money::ZERO,
            due_date: None,
            status: InvoiceStatus::Pending,
            claims: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn student_id(&self) -> Option<StudentId> {
        self.student_id
    }

    pub fn invoice_number(&self) -> Option<&InvoiceNumber> {
        self.invoice_number.as_ref()
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn discount_amount(&self) -> Money {
        self.discount_amount
    }

    /// Net payable: total minus discount. Discounts never exceed the total,
    /// so this cannot underflow.
    pub fn net_amount(&self) -> Money {
        Money::from_minor(
            self.total_amount
                .minor()
                .saturating_sub(self.discount_amount.minor()),
        )
    }

    /// Sum of verified claim amounts. Never exceeds `net_amount`.
    pub fn verified_total(&self) -> Money {
        Money::from_minor(
            self.claims
                .iter()
                .filter(|c| c.status == ClaimStatus::Verified)
                .map(|c| c.amount.minor())
                .sum(),
        )
    }

    pub fn outstanding_amount(&self) -> Money {
        Money::from_minor(
            self.net_amount()
                .minor()
                .saturating_sub(self.verified_total().minor()),
        )
    }

    pub fn charges(&self) -> &[InvoiceCharge] {
        &self.charges
    }

    pub fn claims(&self) -> &[PaymentClaim] {
        &self.claims
    }

    pub fn claim(&self, transaction_id: TransactionId) -> Option<&PaymentClaim> {
        self.claims
            .iter()
            .find(|c| c.transaction_id == transaction_id)
    }

    fn is_terminal(&self) -> bool {
        matches!(self.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RaiseInvoice. Issued by the generation service with charges
/// priced from the fee catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaiseInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub student_id: StudentId,
    pub class_id: ClassId,
    pub invoice_number: InvoiceNumber,
    pub academic_year: AcademicYear,
    pub charges: Vec<InvoiceCharge>,
    pub due_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyDiscount. Replaces the discount; does not stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyDiscount {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub discount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitPayment. A payer's claim to have settled (part of) the
/// invoice; counts toward nothing until verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VerifyPayment. Back-office confirms a submitted claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub transaction_id: TransactionId,
    pub reviewed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectPayment. Back-office declines a submitted claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub transaction_id: TransactionId,
    pub reviewed_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkOverdue. Dispatched by the due-date sweep; a no-op when the
/// invoice is no longer eligible, so sweeps can race safely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkOverdue {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub as_of: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    RaiseInvoice(RaiseInvoice),
    ApplyDiscount(ApplyDiscount),
    SubmitPayment(SubmitPayment),
    VerifyPayment(VerifyPayment),
    RejectPayment(RejectPayment),
    MarkOverdue(MarkOverdue),
    CancelInvoice(CancelInvoice),
}

/// Event: InvoiceRaised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRaised {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub student_id: StudentId,
    pub class_id: ClassId,
    pub invoice_number: InvoiceNumber,
    pub academic_year: AcademicYear,
    pub charges: Vec<InvoiceCharge>,
    pub total_amount: Money,
    pub due_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DiscountApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountApplied {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub discount: Money,
    pub net_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSubmitted {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentVerified. Carries the recomputed verified total so
/// projections need no arithmetic of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentVerified {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub new_verified_total: Money,
    pub reviewed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRejected {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub transaction_id: TransactionId,
    pub reviewed_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceMarkedOverdue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceMarkedOverdue {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub as_of: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceRaised(InvoiceRaised),
    DiscountApplied(DiscountApplied),
    PaymentSubmitted(PaymentSubmitted),
    PaymentVerified(PaymentVerified),
    PaymentRejected(PaymentRejected),
    InvoiceMarkedOverdue(InvoiceMarkedOverdue),
    InvoiceCancelled(InvoiceCancelled),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceRaised(_) => "fees.invoice.raised",
            InvoiceEvent::DiscountApplied(_) => "fees.invoice.discount_applied",
            InvoiceEvent::PaymentSubmitted(_) => "fees.invoice.payment_submitted",
            InvoiceEvent::PaymentVerified(_) => "fees.invoice.payment_verified",
            InvoiceEvent::PaymentRejected(_) => "fees.invoice.payment_rejected",
            InvoiceEvent::InvoiceMarkedOverdue(_) => "fees.invoice.marked_overdue",
            InvoiceEvent::InvoiceCancelled(_) => "fees.invoice.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceRaised(e) => e.occurred_at,
            InvoiceEvent::DiscountApplied(e) => e.occurred_at,
            InvoiceEvent::PaymentSubmitted(e) => e.occurred_at,
            InvoiceEvent::PaymentVerified(e) => e.occurred_at,
            InvoiceEvent::PaymentRejected(e) => e.occurred_at,
            InvoiceEvent::InvoiceMarkedOverdue(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceRaised(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.student_id = Some(e.student_id);
                self.class_id = Some(e.class_id);
                self.invoice_number = Some(e.invoice_number.clone());
                self.academic_year = Some(e.academic_year.clone());
                self.charges = e.charges.clone();
                self.total_amount = e.total_amount;
                self.discount_amount = Money::ZERO;
                self.due_date = Some(e.due_date);
                self.status = InvoiceStatus::Pending;
                self.created = true;
            }
            InvoiceEvent::DiscountApplied(e) => {
                self.discount_amount = e.discount;
                // The discount can close the remaining balance; the status
                // must track the verified-vs-net comparison.
                if !self.is_terminal() && self.verified_total() >= self.net_amount() {
                    self.status = InvoiceStatus::Paid;
                }
            }
            InvoiceEvent::PaymentSubmitted(e) => {
                self.claims.push(PaymentClaim {
                    transaction_id: e.transaction_id,
                    amount: e.amount,
                    method: e.method,
                    reference: e.reference.clone(),
                    status: ClaimStatus::Submitted,
                    submitted_at: e.occurred_at,
                    reviewed_by: None,
                    reviewed_at: None,
                    reject_reason: None,
                });
            }
            InvoiceEvent::PaymentVerified(e) => {
                if let Some(claim) = self
                    .claims
                    .iter_mut()
                    .find(|c| c.transaction_id == e.transaction_id)
                {
                    claim.status = ClaimStatus::Verified;
                    claim.reviewed_by = Some(e.reviewed_by);
                    claim.reviewed_at = Some(e.occurred_at);
                }
                self.status = if e.new_verified_total >= self.net_amount() {
                    InvoiceStatus::Paid
                } else {
                    InvoiceStatus::PartiallyPaid
                };
            }
            InvoiceEvent::PaymentRejected(e) => {
                if let Some(claim) = self
                    .claims
                    .iter_mut()
                    .find(|c| c.transaction_id == e.transaction_id)
                {
                    claim.status = ClaimStatus::Rejected;
                    claim.reviewed_by = Some(e.reviewed_by);
                    claim.reviewed_at = Some(e.occurred_at);
                    claim.reject_reason = Some(e.reason.clone());
                }
            }
            InvoiceEvent::InvoiceMarkedOverdue(_) => {
                self.status = InvoiceStatus::Overdue;
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                self.status = InvoiceStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::RaiseInvoice(cmd) => self.handle_raise(cmd),
            InvoiceCommand::ApplyDiscount(cmd) => self.handle_apply_discount(cmd),
            InvoiceCommand::SubmitPayment(cmd) => self.handle_submit_payment(cmd),
            InvoiceCommand::VerifyPayment(cmd) => self.handle_verify_payment(cmd),
            InvoiceCommand::RejectPayment(cmd) => self.handle_reject_payment(cmd),
            InvoiceCommand::MarkOverdue(cmd) => self.handle_mark_overdue(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Invoice {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_invoice_id(invoice_id)
    }

    fn handle_raise(&self, cmd: &RaiseInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        if cmd.charges.is_empty() {
            return Err(DomainError::validation(
                "cannot raise invoice without charges",
            ));
        }
        if cmd.invoice_number.as_str().trim().is_empty() {
            return Err(DomainError::validation("invoice number must not be empty"));
        }

        for charge in &cmd.charges {
            if charge.amount.is_zero() {
                return Err(DomainError::validation(
                    "invoice charge amount must be positive",
                ));
            }
        }
        let total = Money::checked_sum(cmd.charges.iter().map(|c| c.amount))?;

        Ok(vec![InvoiceEvent::InvoiceRaised(InvoiceRaised {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            student_id: cmd.student_id,
            class_id: cmd.class_id,
            invoice_number: cmd.invoice_number.clone(),
            academic_year: cmd.academic_year.clone(),
            charges: cmd.charges.clone(),
            total_amount: total,
            due_date: cmd.due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply_discount(&self, cmd: &ApplyDiscount) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.invoice_id)?;

        if self.is_terminal() {
            return Err(DomainError::immutable(
                "cannot discount a paid or cancelled invoice",
            ));
        }
        if cmd.discount > self.total_amount {
            return Err(DomainError::validation(
                "discount cannot exceed the invoice total",
            ));
        }

        let net = self.total_amount.checked_sub(cmd.discount)?;
        if net < self.verified_total() {
            return Err(DomainError::invariant(
                "discount would push the net amount below the verified payment total",
            ));
        }

        Ok(vec![InvoiceEvent::DiscountApplied(DiscountApplied {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            discount: cmd.discount,
            net_amount: net,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit_payment(&self, cmd: &SubmitPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.invoice_id)?;

        match self.status {
            InvoiceStatus::Cancelled => {
                return Err(DomainError::immutable(
                    "cannot submit payment against a cancelled invoice",
                ));
            }
            InvoiceStatus::Paid => {
                return Err(DomainError::conflict("invoice is already settled"));
            }
            _ => {}
        }

        if cmd.amount.is_zero() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if self.claim(cmd.transaction_id).is_some() {
            return Err(DomainError::conflict("transaction already submitted"));
        }

        let reference = cmd.reference.as_deref().map(str::trim);
        if cmd.method == PaymentMethod::Upi {
            let utr = reference.unwrap_or("");
            if utr.len() != 12 || !utr.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(DomainError::validation(
                    "UPI payments require a 12-character UTR reference",
                ));
            }
        }

        Ok(vec![InvoiceEvent::PaymentSubmitted(PaymentSubmitted {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            transaction_id: cmd.transaction_id,
            amount: cmd.amount,
            method: cmd.method,
            reference: reference.map(str::to_string),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_verify_payment(&self, cmd: &VerifyPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.invoice_id)?;

        let claim = self
            .claim(cmd.transaction_id)
            .ok_or_else(DomainError::not_found)?;
        if claim.status != ClaimStatus::Submitted {
            return Err(DomainError::already_processed(format!(
                "transaction {} was already reviewed",
                cmd.transaction_id
            )));
        }

        let new_verified_total = self.verified_total().checked_add(claim.amount)?;
        if new_verified_total > self.net_amount() {
            return Err(DomainError::invariant(
                "verifying this payment would exceed the invoice net amount",
            ));
        }

        Ok(vec![InvoiceEvent::PaymentVerified(PaymentVerified {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            transaction_id: cmd.transaction_id,
            amount: claim.amount,
            new_verified_total,
            reviewed_by: cmd.reviewed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject_payment(&self, cmd: &RejectPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.invoice_id)?;

        let claim = self
            .claim(cmd.transaction_id)
            .ok_or_else(DomainError::not_found)?;
        if claim.status != ClaimStatus::Submitted {
            return Err(DomainError::already_processed(format!(
                "transaction {} was already reviewed",
                cmd.transaction_id
            )));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation(
                "a rejection must carry a reason for the payer",
            ));
        }

        Ok(vec![InvoiceEvent::PaymentRejected(PaymentRejected {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            transaction_id: cmd.transaction_id,
            reviewed_by: cmd.reviewed_by,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_overdue(&self, cmd: &MarkOverdue) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.invoice_id)?;

        let eligible = matches!(
            self.status,
            InvoiceStatus::Pending | InvoiceStatus::PartiallyPaid
        ) && self.due_date.is_some_and(|due| due < cmd.as_of)
            && self.verified_total() < self.net_amount();

        // Stale sweep input is not an error; the aggregate simply declines.
        if !eligible {
            return Ok(vec![]);
        }

        Ok(vec![InvoiceEvent::InvoiceMarkedOverdue(
            InvoiceMarkedOverdue {
                tenant_id: cmd.tenant_id,
                invoice_id: cmd.invoice_id,
                as_of: cmd.as_of,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.invoice_id)?;

        match self.status {
            InvoiceStatus::Cancelled => {
                return Err(DomainError::conflict("invoice is already cancelled"));
            }
            InvoiceStatus::Paid => {
                return Err(DomainError::immutable("paid invoices cannot be cancelled"));
            }
            _ => {}
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            reason: cmd.reason.clone(),
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

    fn test_invoice_id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_due_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 30).unwrap()
    }

    fn test_utr() -> Option<String> {
        Some("UTR123456789".to_string())
    }

    fn raised_invoice(tenant_id: TenantId, invoice_id: InvoiceId, total_minor: u64) -> Invoice {
        let mut invoice = Invoice::empty(invoice_id);
        let cmd = RaiseInvoice {
            tenant_id,
            invoice_id,
            student_id: StudentId::new(),
            class_id: ClassId::new(),
            invoice_number: InvoiceNumber::new("INV-00001-AB12CD"),
            academic_year: AcademicYear::new("2026-27").unwrap(),
            charges: vec![InvoiceCharge {
                fee_head_id: FeeHeadId::new(),
                amount: Money::from_minor(total_minor),
            }],
            due_date: test_due_date(),
            occurred_at: test_time(),
        };
        let events = invoice.handle(&InvoiceCommand::RaiseInvoice(cmd)).unwrap();
        for e in &events {
            invoice.apply(e);
        }
        invoice
    }

    fn submit(invoice: &mut Invoice, amount_minor: u64) -> TransactionId {
        let tenant_id = invoice.tenant_id().unwrap();
        let invoice_id = invoice.id_typed();
        let transaction_id = TransactionId::new();
        let events = invoice
            .handle(&InvoiceCommand::SubmitPayment(SubmitPayment {
                tenant_id,
                invoice_id,
                transaction_id,
                amount: Money::from_minor(amount_minor),
                method: PaymentMethod::Upi,
                reference: test_utr(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }
        transaction_id
    }

    fn verify(invoice: &mut Invoice, transaction_id: TransactionId) -> Result<(), DomainError> {
        let tenant_id = invoice.tenant_id().unwrap();
        let invoice_id = invoice.id_typed();
        let events = invoice.handle(&InvoiceCommand::VerifyPayment(VerifyPayment {
            tenant_id,
            invoice_id,
            transaction_id,
            reviewed_by: UserId::new(),
            occurred_at: test_time(),
        }))?;
        for e in &events {
            invoice.apply(e);
        }
        Ok(())
    }

    #[test]
    fn raise_computes_total_from_charges() {
        let invoice = Invoice::empty(test_invoice_id());
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();

        let cmd = RaiseInvoice {
            tenant_id,
            invoice_id,
            student_id: StudentId::new(),
            class_id: ClassId::new(),
            invoice_number: InvoiceNumber::new("INV-00001-AB12CD"),
            academic_year: AcademicYear::new("2026-27").unwrap(),
            charges: vec![
                InvoiceCharge {
                    fee_head_id: FeeHeadId::new(),
                    amount: Money::from_minor(300_000),
                },
                InvoiceCharge {
                    fee_head_id: FeeHeadId::new(),
                    amount: Money::from_minor(200_000),
                },
            ],
            due_date: test_due_date(),
            occurred_at: test_time(),
        };

        let events = invoice.handle(&InvoiceCommand::RaiseInvoice(cmd)).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            InvoiceEvent::InvoiceRaised(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.total_amount, Money::from_minor(500_000));
            }
            other => panic!("expected InvoiceRaised, got {other:?}"),
        }
    }

    #[test]
    fn discount_reduces_net_and_full_payment_settles() {
        // Invoice 5000.00, discount 1000.00, verified UTR payment of 4000.00
        // leaves the invoice paid with nothing outstanding.
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let events = invoice
            .handle(&InvoiceCommand::ApplyDiscount(ApplyDiscount {
                tenant_id,
                invoice_id,
                discount: Money::from_minor(100_000),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }
        assert_eq!(invoice.net_amount(), Money::from_minor(400_000));
        assert_eq!(invoice.status(), InvoiceStatus::Pending);

        let txn = submit(&mut invoice, 400_000);
        verify(&mut invoice, txn).unwrap();

        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.verified_total(), Money::from_minor(400_000));
        assert_eq!(invoice.outstanding_amount(), Money::ZERO);
    }

    #[test]
    fn partial_verification_leaves_invoice_partially_paid() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let txn = submit(&mut invoice, 200_000);
        verify(&mut invoice, txn).unwrap();

        assert_eq!(invoice.status(), InvoiceStatus::PartiallyPaid);
        assert_eq!(invoice.outstanding_amount(), Money::from_minor(300_000));
    }

    #[test]
    fn discount_that_clears_the_balance_settles_the_invoice() {
        // 5000.00 raised, 4000.00 verified, then a 1000.00 discount: the
        // verified total now covers the net amount, so the invoice is paid.
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let txn = submit(&mut invoice, 400_000);
        verify(&mut invoice, txn).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::PartiallyPaid);

        let events = invoice
            .handle(&InvoiceCommand::ApplyDiscount(ApplyDiscount {
                tenant_id,
                invoice_id,
                discount: Money::from_minor(100_000),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }

        assert_eq!(invoice.net_amount(), invoice.verified_total());
        assert_eq!(invoice.outstanding_amount(), Money::ZERO);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
    }

    #[test]
    fn concurrent_duplicate_submissions_resolve_at_verification() {
        // Both payers' claims are accepted; the second verification must not
        // settle the invoice twice.
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let first = submit(&mut invoice, 500_000);
        let second = submit(&mut invoice, 500_000);

        verify(&mut invoice, first).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);

        let err = verify(&mut invoice, second).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        // The surplus claim can still be rejected with a reason.
        let events = invoice
            .handle(&InvoiceCommand::RejectPayment(RejectPayment {
                tenant_id,
                invoice_id,
                transaction_id: second,
                reviewed_by: UserId::new(),
                reason: "duplicate settlement of a paid invoice".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }
        assert_eq!(
            invoice.claim(second).unwrap().status,
            ClaimStatus::Rejected
        );
    }

    #[test]
    fn reviewing_a_claim_twice_is_already_processed() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let txn = submit(&mut invoice, 100_000);
        verify(&mut invoice, txn).unwrap();

        let err = verify(&mut invoice, txn).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyProcessed(_)));

        let err = invoice
            .handle(&InvoiceCommand::RejectPayment(RejectPayment {
                tenant_id,
                invoice_id,
                transaction_id: txn,
                reviewed_by: UserId::new(),
                reason: "too late".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyProcessed(_)));
    }

    #[test]
    fn verifying_unknown_transaction_is_not_found() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let err = invoice
            .handle(&InvoiceCommand::VerifyPayment(VerifyPayment {
                tenant_id,
                invoice_id,
                transaction_id: TransactionId::new(),
                reviewed_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn discount_cannot_undercut_verified_payments() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let txn = submit(&mut invoice, 300_000);
        verify(&mut invoice, txn).unwrap();

        let err = invoice
            .handle(&InvoiceCommand::ApplyDiscount(ApplyDiscount {
                tenant_id,
                invoice_id,
                discount: Money::from_minor(300_000),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn upi_submission_requires_a_well_formed_utr() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        for bad in [None, Some("short".to_string()), Some("has spaces 12".to_string())] {
            let err = invoice
                .handle(&InvoiceCommand::SubmitPayment(SubmitPayment {
                    tenant_id,
                    invoice_id,
                    transaction_id: TransactionId::new(),
                    amount: Money::from_minor(100_000),
                    method: PaymentMethod::Upi,
                    reference: bad,
                    occurred_at: test_time(),
                }))
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn cash_submission_needs_no_reference() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let events = invoice
            .handle(&InvoiceCommand::SubmitPayment(SubmitPayment {
                tenant_id,
                invoice_id,
                transaction_id: TransactionId::new(),
                amount: Money::from_minor(100_000),
                method: PaymentMethod::Cash,
                reference: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn cancelled_invoice_is_a_tombstone() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let events = invoice
            .handle(&InvoiceCommand::CancelInvoice(CancelInvoice {
                tenant_id,
                invoice_id,
                reason: Some("duplicate enrolment".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }
        assert_eq!(invoice.status(), InvoiceStatus::Cancelled);

        let err = invoice
            .handle(&InvoiceCommand::SubmitPayment(SubmitPayment {
                tenant_id,
                invoice_id,
                transaction_id: TransactionId::new(),
                amount: Money::from_minor(100_000),
                method: PaymentMethod::Upi,
                reference: test_utr(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::ImmutableState(_)));

        let err = invoice
            .handle(&InvoiceCommand::CancelInvoice(CancelInvoice {
                tenant_id,
                invoice_id,
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn paid_invoice_cannot_be_cancelled() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let txn = submit(&mut invoice, 500_000);
        verify(&mut invoice, txn).unwrap();

        let err = invoice
            .handle(&InvoiceCommand::CancelInvoice(CancelInvoice {
                tenant_id,
                invoice_id,
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::ImmutableState(_)));
    }

    #[test]
    fn overdue_marking_is_guarded_and_idempotent() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let before_due = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let after_due = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();

        // Not yet due: nothing happens.
        let events = invoice
            .handle(&InvoiceCommand::MarkOverdue(MarkOverdue {
                tenant_id,
                invoice_id,
                as_of: before_due,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());

        let events = invoice
            .handle(&InvoiceCommand::MarkOverdue(MarkOverdue {
                tenant_id,
                invoice_id,
                as_of: after_due,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
        for e in &events {
            invoice.apply(e);
        }
        assert_eq!(invoice.status(), InvoiceStatus::Overdue);

        // Second sweep sees an overdue invoice and declines again.
        let events = invoice
            .handle(&InvoiceCommand::MarkOverdue(MarkOverdue {
                tenant_id,
                invoice_id,
                as_of: after_due,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn overdue_invoice_still_accepts_verification() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = raised_invoice(tenant_id, invoice_id, 500_000);

        let after_due = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let events = invoice
            .handle(&InvoiceCommand::MarkOverdue(MarkOverdue {
                tenant_id,
                invoice_id,
                as_of: after_due,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }
        assert_eq!(invoice.status(), InvoiceStatus::Overdue);

        let txn = submit(&mut invoice, 500_000);
        verify(&mut invoice, txn).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: across any sequence of submissions and verification
        /// attempts, the verified total never exceeds the net amount and
        /// net always equals total minus discount.
        #[test]
        fn verified_total_never_exceeds_net(
            total in 1_000u64..10_000_000u64,
            discount_pct in 0u64..100u64,
            amounts in prop::collection::vec(1u64..5_000_000u64, 1..8)
        ) {
            let tenant_id = test_tenant_id();
            let invoice_id = test_invoice_id();
            let mut invoice = raised_invoice(tenant_id, invoice_id, total);

            let discount = total * discount_pct / 100;
            let events = invoice
                .handle(&InvoiceCommand::ApplyDiscount(ApplyDiscount {
                    tenant_id,
                    invoice_id,
                    discount: Money::from_minor(discount),
                    occurred_at: test_time(),
                }))
                .unwrap();
            for e in &events {
                invoice.apply(e);
            }

            for amount in amounts {
                if matches!(
                    invoice.status(),
                    InvoiceStatus::Paid | InvoiceStatus::Cancelled
                ) {
                    break;
                }
                let txn = submit(&mut invoice, amount);
                // Verification may be refused (overpayment); that is fine.
                let _ = verify(&mut invoice, txn);

                prop_assert!(invoice.verified_total() <= invoice.net_amount());
                prop_assert_eq!(
                    invoice.net_amount().minor(),
                    invoice.total_amount().minor() - invoice.discount_amount().minor()
                );
            }
        }
    }
}
