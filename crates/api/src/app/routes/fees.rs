use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;

use campusledger_auth::Permission;
use campusledger_catalog::{
    AcademicYear, CatalogCommand, CatalogId, CreateFeeHead, DeactivateFeeHead, FeeCatalog,
    FeeHeadId, FeeStructureId, SetFeeStructure,
};
use campusledger_core::Money;
use campusledger_directory::ClassId;

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/heads", post(create_fee_head).get(list_fee_heads))
        .route("/heads/:id", get(get_fee_head))
        .route("/heads/:id/deactivate", post(deactivate_fee_head))
        .route("/structures", put(set_fee_structure).get(list_fee_structures))
}

pub async fn create_fee_head(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::CreateFeeHeadRequest>,
) -> axum::response::Response {
    let catalog_id = CatalogId::for_tenant(tenant.tenant_id());
    let fee_head_id = FeeHeadId::new();

    let cmd = CatalogCommand::CreateFeeHead(CreateFeeHead {
        tenant_id: tenant.tenant_id(),
        fee_head_id,
        name: body.name,
        description: body.description,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("fees.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.dispatch::<FeeCatalog>(
        tenant.tenant_id(),
        catalog_id.0,
        "fees.catalog",
        cmd_auth.inner,
        |_t, id| FeeCatalog::empty(CatalogId::new(id)),
    ) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": fee_head_id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn deactivate_fee_head(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let fee_head_id: FeeHeadId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid fee head id");
        }
    };
    let catalog_id = CatalogId::for_tenant(tenant.tenant_id());

    let cmd = CatalogCommand::DeactivateFeeHead(DeactivateFeeHead {
        tenant_id: tenant.tenant_id(),
        fee_head_id,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("fees.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.dispatch::<FeeCatalog>(
        tenant.tenant_id(),
        catalog_id.0,
        "fees.catalog",
        cmd_auth.inner,
        |_t, id| FeeCatalog::empty(CatalogId::new(id)),
    ) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": fee_head_id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn set_fee_structure(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::SetFeeStructureRequest>,
) -> axum::response::Response {
    let class_id: ClassId = match body.class_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid class_id");
        }
    };
    let fee_head_id: FeeHeadId = match body.fee_head_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid fee_head_id");
        }
    };
    let academic_year = match AcademicYear::new(body.academic_year) {
        Ok(y) => y,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string());
        }
    };

    let catalog_id = CatalogId::for_tenant(tenant.tenant_id());
    let structure_id = FeeStructureId::new();

    let cmd = CatalogCommand::SetFeeStructure(SetFeeStructure {
        tenant_id: tenant.tenant_id(),
        structure_id,
        class_id,
        fee_head_id,
        amount: Money::from_minor(body.amount),
        academic_year,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("fees.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.dispatch::<FeeCatalog>(
        tenant.tenant_id(),
        catalog_id.0,
        "fees.catalog",
        cmd_auth.inner,
        |_t, id| FeeCatalog::empty(CatalogId::new(id)),
    ) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": structure_id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_fee_head(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let fee_head_id: FeeHeadId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid fee head id");
        }
    };
    match services.head_get(tenant.tenant_id(), &fee_head_id) {
        Some(rm) => (StatusCode::OK, Json(dto::fee_head_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "fee head not found"),
    }
}

pub async fn list_fee_heads(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .heads_list(tenant.tenant_id())
        .into_iter()
        .map(dto::fee_head_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn list_fee_structures(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .structures_list(tenant.tenant_id())
        .into_iter()
        .map(dto::fee_structure_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
