use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};

use campusledger_auth::Permission;
use campusledger_catalog::AcademicYear;
use campusledger_core::Money;
use campusledger_directory::{StudentId, TenantRegistry};
use campusledger_infra::generation::GenerationRequest;
use campusledger_invoicing::{
    ApplyDiscount, CancelInvoice, Invoice, InvoiceCommand, InvoiceId, SubmitPayment, TransactionId,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices))
        .route("/generate", post(generate_invoices))
        .route("/sweep-overdue", post(sweep_overdue))
        .route("/:id", get(get_invoice))
        .route("/:id/discount", post(apply_discount))
        .route("/:id/cancel", post(cancel_invoice))
        .route("/:id/payments", post(submit_payment))
        .route("/:id/payment-intent", get(payment_intent))
}

pub async fn generate_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::GenerateInvoicesRequest>,
) -> axum::response::Response {
    let mut student_ids = Vec::with_capacity(body.student_ids.len());
    for raw in &body.student_ids {
        match raw.parse::<StudentId>() {
            Ok(v) => student_ids.push(v),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_id",
                    format!("invalid student id: {raw}"),
                );
            }
        }
    }
    let academic_year = match AcademicYear::new(body.academic_year) {
        Ok(y) => y,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string());
        }
    };
    let due_date = match body.due_date.parse::<NaiveDate>() {
        Ok(d) => d,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_due_date",
                "due_date must be an ISO date (YYYY-MM-DD)",
            );
        }
    };

    let req = GenerationRequest {
        tenant_id: tenant.tenant_id(),
        student_ids,
        academic_year,
        due_date,
        today: Utc::now().date_naive(),
        now: Utc::now(),
    };

    // The run dispatches multiple commands; authorize once up front.
    let cmd_auth = CmdAuth {
        inner: (),
        required: vec![Permission::new("invoices.generate")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.generate(req) {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(dto::generation_outcome_to_json(outcome)),
        )
            .into_response(),
        Err(e) => errors::generation_error_to_response(e),
    }
}

pub async fn sweep_overdue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::SweepOverdueRequest>,
) -> axum::response::Response {
    let as_of = match body.as_of {
        Some(raw) => match raw.parse::<NaiveDate>() {
            Ok(d) => d,
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_as_of",
                    "as_of must be an ISO date (YYYY-MM-DD)",
                );
            }
        },
        None => Utc::now().date_naive(),
    };

    let cmd_auth = CmdAuth {
        inner: (),
        required: vec![Permission::new("invoices.adjust")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let outcome = services.sweep_overdue(tenant.tenant_id(), as_of, Utc::now());
    (StatusCode::OK, Json(dto::sweep_outcome_to_json(outcome))).into_response()
}

pub async fn apply_discount(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ApplyDiscountRequest>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = InvoiceCommand::ApplyDiscount(ApplyDiscount {
        tenant_id: tenant.tenant_id(),
        invoice_id,
        discount: Money::from_minor(body.discount),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("invoices.adjust")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    dispatch_invoice_command(&services, &tenant, invoice_id, cmd_auth.inner)
}

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelInvoiceRequest>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = InvoiceCommand::CancelInvoice(CancelInvoice {
        tenant_id: tenant.tenant_id(),
        invoice_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("invoices.adjust")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    dispatch_invoice_command(&services, &tenant, invoice_id, cmd_auth.inner)
}

pub async fn submit_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SubmitPaymentRequest>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let method = match errors::parse_payment_method(&body.method) {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let transaction_id = TransactionId::new();
    let cmd = InvoiceCommand::SubmitPayment(SubmitPayment {
        tenant_id: tenant.tenant_id(),
        invoice_id,
        transaction_id,
        amount: Money::from_minor(body.amount),
        method,
        reference: body.reference,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("payments.submit")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.dispatch::<Invoice>(
        tenant.tenant_id(),
        invoice_id.0,
        "fees.invoice",
        cmd_auth.inner,
        |_t, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
    ) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "transaction_id": transaction_id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Render the UPI payment intent for an invoice's outstanding balance.
///
/// Purely a read: nothing is reserved, and the claim the payer later submits
/// is free to differ from the suggested amount.
pub async fn payment_intent(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let rm = match services.invoices_get(tenant.tenant_id(), &invoice_id) {
        Some(rm) => rm,
        None => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
    };

    let outstanding = rm.outstanding_amount();
    if outstanding.is_zero() {
        return errors::json_error(
            StatusCode::CONFLICT,
            "nothing_outstanding",
            "invoice has no outstanding balance",
        );
    }

    let settings = services.tenant_registry().settings(tenant.tenant_id());
    let intent = format!(
        "upi://pay?pa={}&am={}&tn={}&cu=INR",
        settings.payee_vpa,
        outstanding,
        rm.invoice_number.as_str(),
    );

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "payable_to": settings.payee_vpa,
            "amount": outstanding.minor(),
            "reference": rm.invoice_number.as_str(),
            "intent_uri": intent,
        })),
    )
        .into_response()
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.invoices_get(tenant.tenant_id(), &invoice_id) {
        Some(rm) => (StatusCode::OK, Json(dto::invoice_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .invoices_list(tenant.tenant_id())
        .into_iter()
        .map(dto::invoice_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

fn parse_invoice_id(raw: &str) -> Result<InvoiceId, axum::response::Response> {
    raw.parse()
        .map(InvoiceId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id"))
}

fn dispatch_invoice_command(
    services: &AppServices,
    tenant: &crate::context::TenantContext,
    invoice_id: InvoiceId,
    command: InvoiceCommand,
) -> axum::response::Response {
    match services.dispatch::<Invoice>(
        tenant.tenant_id(),
        invoice_id.0,
        "fees.invoice",
        command,
        |_t, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
    ) {
        Ok(committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": invoice_id.0.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
