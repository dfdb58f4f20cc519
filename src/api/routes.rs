use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    get_certificate_handler, health_handler, issue_certificate_handler,
    list_certificates_handler, revoke_certificate_handler, revoke_thing_certificates_handler,
};
use crate::services::CertificateService;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<CertificateService>,
    /// Deadline applied to every request
    pub request_timeout: Duration,
}

pub fn build_router(service: Arc<CertificateService>, request_timeout: Duration) -> Router {
    let state = ApiState { service, request_timeout };

    Router::new()
        .route("/certs", post(issue_certificate_handler).get(list_certificates_handler))
        .route("/certs/{serial}", get(get_certificate_handler))
        .route("/certs/{serial}/revoke", post(revoke_certificate_handler))
        .route("/things/{thing_id}/certs/revoke", post(revoke_thing_certificates_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
