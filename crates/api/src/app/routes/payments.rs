use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use campusledger_auth::Permission;
use campusledger_core::UserId;
use campusledger_invoicing::{
    Invoice, InvoiceCommand, InvoiceId, RejectPayment, TransactionId, VerifyPayment,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:txn", get(get_payment))
        .route("/:txn/verify", post(verify_payment))
        .route("/:txn/reject", post(reject_payment))
}

pub async fn verify_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(txn): Path<String>,
) -> axum::response::Response {
    let transaction_id = match parse_transaction_id(&txn) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let rm = match services.find_by_transaction(tenant.tenant_id(), &transaction_id) {
        Some(rm) => rm,
        None => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "transaction not found");
        }
    };

    let cmd = InvoiceCommand::VerifyPayment(VerifyPayment {
        tenant_id: tenant.tenant_id(),
        invoice_id: rm.invoice_id,
        transaction_id,
        reviewed_by: UserId::from_uuid(*principal.principal_id().as_uuid()),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("payments.review")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    dispatch_review(&services, &tenant, rm.invoice_id, cmd_auth.inner)
}

pub async fn reject_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(txn): Path<String>,
    Json(body): Json<dto::RejectPaymentRequest>,
) -> axum::response::Response {
    let transaction_id = match parse_transaction_id(&txn) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let rm = match services.find_by_transaction(tenant.tenant_id(), &transaction_id) {
        Some(rm) => rm,
        None => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "transaction not found");
        }
    };

    let cmd = InvoiceCommand::RejectPayment(RejectPayment {
        tenant_id: tenant.tenant_id(),
        invoice_id: rm.invoice_id,
        transaction_id,
        reviewed_by: UserId::from_uuid(*principal.principal_id().as_uuid()),
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("payments.review")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    dispatch_review(&services, &tenant, rm.invoice_id, cmd_auth.inner)
}

pub async fn get_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(txn): Path<String>,
) -> axum::response::Response {
    let transaction_id = match parse_transaction_id(&txn) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let rm = match services.find_by_transaction(tenant.tenant_id(), &transaction_id) {
        Some(rm) => rm,
        None => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "transaction not found");
        }
    };

    let claim = rm
        .transactions
        .iter()
        .find(|t| t.transaction_id == transaction_id)
        .cloned();
    match claim {
        Some(t) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "invoice_id": rm.invoice_id.0.to_string(),
                "invoice_number": rm.invoice_number.as_str(),
                "claim": dto::transaction_to_json(t),
            })),
        )
            .into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "transaction not found"),
    }
}

fn parse_transaction_id(raw: &str) -> Result<TransactionId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid transaction id")
    })
}

fn dispatch_review(
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
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "invoice_id": invoice_id.0.to_string() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
