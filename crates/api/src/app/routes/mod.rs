use axum::{Router, routing::get};

pub mod admin;
pub mod common;
pub mod fees;
pub mod invoices;
pub mod payments;
pub mod students;
pub mod summary;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/fees", fees::router())
        .nest("/students", students::router())
        .nest("/invoices", invoices::router())
        .nest("/payments", payments::router())
        .nest("/summary", summary::router())
        .nest("/admin", admin::router())
}
