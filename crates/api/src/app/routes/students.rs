use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use campusledger_auth::Permission;
use campusledger_directory::{ClassId, StudentDirectory, StudentId, StudentRecord};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/", post(register_student).get(list_students))
}

pub async fn register_student(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::RegisterStudentRequest>,
) -> axum::response::Response {
    let class_id: ClassId = match body.class_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid class_id");
        }
    };
    if body.full_name.trim().is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "full_name must not be empty",
        );
    }

    let cmd_auth = CmdAuth {
        inner: (),
        required: vec![Permission::new("students.manage")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let record = StudentRecord {
        student_id: StudentId::new(),
        tenant_id: tenant.tenant_id(),
        class_id,
        full_name: body.full_name.trim().to_string(),
    };
    let student_id = record.student_id;
    services.directory().upsert(record);

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": student_id.to_string() })),
    )
        .into_response()
}

pub async fn list_students(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .directory()
        .list(tenant.tenant_id())
        .into_iter()
        .map(dto::student_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
