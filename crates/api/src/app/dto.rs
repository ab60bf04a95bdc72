use serde::Deserialize;

use campusledger_directory::StudentRecord;
use campusledger_infra::generation::GenerationOutcome;
use campusledger_infra::projections::{
    FeeHeadReadModel, FeeStructureReadModel, InvoiceReadModel, TransactionReadModel,
};
use campusledger_infra::reporting::FeeSummary;
use campusledger_infra::sweep::SweepOutcome;
use campusledger_invoicing::{ClaimStatus, InvoiceStatus, PaymentMethod};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateFeeHeadRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct SetFeeStructureRequest {
    pub class_id: String,
    pub fee_head_id: String,
    /// Amount in minor units (paise).
    pub amount: u64,
    pub academic_year: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateInvoicesRequest {
    pub student_ids: Vec<String>,
    pub academic_year: String,
    /// ISO date (YYYY-MM-DD).
    pub due_date: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplyDiscountRequest {
    /// Discount in minor units; replaces any earlier discount.
    pub discount: u64,
}

#[derive(Debug, Deserialize)]
pub struct SubmitPaymentRequest {
    /// Amount in minor units (paise).
    pub amount: u64,
    pub method: String,
    /// UTR for UPI claims; free-form note for cash.
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectPaymentRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelInvoiceRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SweepOverdueRequest {
    /// ISO date; defaults to today when omitted.
    pub as_of: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterStudentRequest {
    pub class_id: String,
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct TenantSettingsRequest {
    pub active: bool,
    pub payee_vpa: String,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn invoice_status_str(status: InvoiceStatus) -> &'static str {
    match status {
        InvoiceStatus::Pending => "pending",
        InvoiceStatus::PartiallyPaid => "partially_paid",
        InvoiceStatus::Paid => "paid",
        InvoiceStatus::Overdue => "overdue",
        InvoiceStatus::Cancelled => "cancelled",
    }
}

pub fn claim_status_str(status: ClaimStatus) -> &'static str {
    match status {
        ClaimStatus::Submitted => "submitted",
        ClaimStatus::Verified => "verified",
        ClaimStatus::Rejected => "rejected",
    }
}

pub fn payment_method_str(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Upi => "upi",
        PaymentMethod::Cash => "cash",
    }
}

pub fn fee_head_to_json(rm: FeeHeadReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.fee_head_id.to_string(),
        "name": rm.name,
        "description": rm.description,
        "active": rm.active,
        "created_at": rm.created_at.to_rfc3339(),
    })
}

pub fn fee_structure_to_json(rm: FeeStructureReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.structure_id.to_string(),
        "class_id": rm.class_id.to_string(),
        "fee_head_id": rm.fee_head_id.to_string(),
        "academic_year": rm.academic_year.as_str(),
        "amount": rm.amount.minor(),
        "locked": rm.locked,
    })
}

pub fn transaction_to_json(rm: TransactionReadModel) -> serde_json::Value {
    serde_json::json!({
        "transaction_id": rm.transaction_id.to_string(),
        "amount": rm.amount.minor(),
        "method": payment_method_str(rm.method),
        "reference": rm.reference,
        "status": claim_status_str(rm.status),
        "submitted_at": rm.submitted_at.to_rfc3339(),
        "reject_reason": rm.reject_reason,
    })
}

pub fn invoice_to_json(rm: InvoiceReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.invoice_id.0.to_string(),
        "student_id": rm.student_id.to_string(),
        "class_id": rm.class_id.to_string(),
        "invoice_number": rm.invoice_number.as_str(),
        "academic_year": rm.academic_year.as_str(),
        "status": invoice_status_str(rm.status),
        "total_amount": rm.total_amount.minor(),
        "discount_amount": rm.discount_amount.minor(),
        "net_amount": rm.net_amount().minor(),
        "verified_amount": rm.verified_amount.minor(),
        "outstanding_amount": rm.outstanding_amount().minor(),
        "due_date": rm.due_date.to_string(),
        "raised_at": rm.raised_at.to_rfc3339(),
        "charges": rm.charges.iter().map(|c| serde_json::json!({
            "fee_head_id": c.fee_head_id.to_string(),
            "amount": c.amount.minor(),
        })).collect::<Vec<_>>(),
        "transactions": rm.transactions.into_iter().map(transaction_to_json).collect::<Vec<_>>(),
    })
}

pub fn generation_outcome_to_json(outcome: GenerationOutcome) -> serde_json::Value {
    serde_json::json!({
        "invoices": outcome.invoices.into_iter().map(|g| serde_json::json!({
            "invoice_id": g.invoice_id.0.to_string(),
            "student_id": g.student_id.to_string(),
            "invoice_number": g.invoice_number.as_str(),
            "total_amount": g.total_amount.minor(),
        })).collect::<Vec<_>>(),
        "skipped": outcome.skipped.into_iter().map(|s| serde_json::json!({
            "student_id": s.student_id.to_string(),
            "reason": s.reason,
        })).collect::<Vec<_>>(),
    })
}

pub fn sweep_outcome_to_json(outcome: SweepOutcome) -> serde_json::Value {
    serde_json::json!({
        "marked": outcome.marked,
        "skipped": outcome.skipped,
        "failed": outcome.failed,
    })
}

pub fn summary_to_json(summary: FeeSummary) -> serde_json::Value {
    serde_json::json!({
        "total_invoiced": summary.total_invoiced.minor(),
        "total_collected": summary.total_collected.minor(),
        "total_pending": summary.total_pending.minor(),
        "total_outstanding": summary.total_outstanding.minor(),
        "invoice_count": summary.invoice_count,
        "overdue_count": summary.overdue_count,
        "cancelled_count": summary.cancelled_count,
    })
}

pub fn student_to_json(record: StudentRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.student_id.to_string(),
        "class_id": record.class_id.to_string(),
        "full_name": record.full_name,
    })
}
