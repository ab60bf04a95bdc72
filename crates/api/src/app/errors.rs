use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use campusledger_infra::command_dispatcher::DispatchError;
use campusledger_infra::event_store::EventStoreError;
use campusledger_infra::generation::GenerationError;
use campusledger_invoicing::PaymentMethod;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::ImmutableState(msg) => {
            json_error(StatusCode::CONFLICT, "immutable_state", msg)
        }
        DispatchError::AlreadyProcessed(msg) => {
            json_error(StatusCode::CONFLICT, "already_processed", msg)
        }
        DispatchError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized => {
            json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized")
        }
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(EventStoreError::Timeout(msg)) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "timeout", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
        DispatchError::TenantIsolation(msg) => {
            json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg)
        }
    }
}

pub fn generation_error_to_response(err: GenerationError) -> axum::response::Response {
    match err {
        GenerationError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        GenerationError::Numbering(e) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "generation_error",
            e.to_string(),
        ),
        GenerationError::Dispatch(e) => dispatch_error_to_response(e),
        GenerationError::Store(EventStoreError::Timeout(msg)) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "timeout", msg)
        }
        GenerationError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        GenerationError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_payment_method(s: &str) -> Result<PaymentMethod, axum::response::Response> {
    match s.to_lowercase().as_str() {
        "upi" => Ok(PaymentMethod::Upi),
        "cash" => Ok(PaymentMethod::Cash),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_payment_method",
            "method must be one of: upi, cash",
        )),
    }
}
