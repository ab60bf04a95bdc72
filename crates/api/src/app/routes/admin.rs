use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use campusledger_auth::Permission;
use campusledger_directory::{TenantRegistry, TenantSettings};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/settings", get(get_settings).put(put_settings))
}

pub async fn get_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let settings = services.tenant_registry().settings(tenant.tenant_id());
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "active": settings.active,
            "payee_vpa": settings.payee_vpa,
        })),
    )
        .into_response()
}

/// Update the school's settings.
///
/// Setting `active: false` locks the school out of the API entirely,
/// including this endpoint; reactivation then has to happen out of band.
pub async fn put_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::TenantSettingsRequest>,
) -> axum::response::Response {
    if body.payee_vpa.trim().is_empty() || !body.payee_vpa.contains('@') {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "payee_vpa must look like name@psp",
        );
    }

    let cmd_auth = CmdAuth {
        inner: (),
        required: vec![Permission::new("tenant.configure")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    services.tenant_registry().upsert(
        tenant.tenant_id(),
        TenantSettings {
            active: body.active,
            payee_vpa: body.payee_vpa.trim().to_string(),
        },
    );

    (StatusCode::OK, Json(serde_json::json!({ "updated": true }))).into_response()
}
