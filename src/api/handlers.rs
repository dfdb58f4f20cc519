//! HTTP handlers. Each one turns a request into a service call and maps the
//! outcome; no business rules live here.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use tracing::instrument;
use validator::Validate;

use super::dto::{
    CertificatePageResponse, CertificateResponse, HealthResponse, IssueCertificateRequest,
    IssuedCertificateResponse, ListCertificatesQuery, RevokeCertificateResponse,
    RevokeThingCertificatesResponse,
};
use super::error::ApiError;
use super::routes::ApiState;
use crate::domain::{normalize_serial, parse_validity, KeySpec, PageRequest, ThingId};
use crate::services::RequestContext;

/// Build the request context from the `Authorization` header.
///
/// Both `Bearer <token>` and a bare token are accepted. A missing header yields
/// an empty token, which the token verifier rejects as missing.
fn request_context(state: &ApiState, headers: &HeaderMap) -> Result<RequestContext, ApiError> {
    let token = match headers.get(AUTHORIZATION) {
        None => String::new(),
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ApiError::Unauthorized("Malformed authorization header".to_string()))?
                .trim();
            match value.split_once(' ') {
                Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
                    token.trim().to_string()
                }
                _ => value.to_string(),
            }
        }
    };
    Ok(RequestContext::new(token, state.request_timeout))
}

#[instrument(skip(state, headers, payload), name = "http_issue_certificate")]
pub async fn issue_certificate_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<IssueCertificateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IssuedCertificateResponse>), ApiError> {
    let Json(payload) = payload?;
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let ctx = request_context(&state, &headers)?;

    let thing_id = ThingId::parse(&payload.thing_id)?;
    let validity = payload.ttl.as_deref().map(parse_validity).transpose()?;
    let key_spec = match (&payload.key_type, payload.key_bits) {
        (Some(key_type), bits) => Some(KeySpec::from_parts(key_type, bits)?),
        (None, Some(_)) => {
            return Err(ApiError::BadRequest("key_bits requires key_type".to_string()));
        }
        (None, None) => None,
    };

    let record = state.service.issue_certificate(&ctx, &thing_id, validity, key_spec).await?;
    Ok((StatusCode::CREATED, Json(IssuedCertificateResponse::from(&record))))
}

#[instrument(skip(state, headers, query), name = "http_list_certificates")]
pub async fn list_certificates_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    query: Result<Query<ListCertificatesQuery>, QueryRejection>,
) -> Result<Json<CertificatePageResponse>, ApiError> {
    let Query(query) = query?;
    let ctx = request_context(&state, &headers)?;

    let page = PageRequest::new(
        query.offset.unwrap_or(0),
        query.limit.unwrap_or(PageRequest::DEFAULT_LIMIT),
    )?;
    let thing_id = query.thing_id.as_deref().map(ThingId::parse).transpose()?;

    let page = state.service.list_certificates(&ctx, thing_id.as_ref(), page).await?;
    Ok(Json(CertificatePageResponse::from(&page)))
}

#[instrument(skip(state, headers), name = "http_get_certificate")]
pub async fn get_certificate_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(serial): Path<String>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let ctx = request_context(&state, &headers)?;
    let record = state.service.get_certificate(&ctx, &serial).await?;
    Ok(Json(CertificateResponse::from(&record)))
}

#[instrument(skip(state, headers), name = "http_revoke_certificate")]
pub async fn revoke_certificate_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(serial): Path<String>,
) -> Result<Json<RevokeCertificateResponse>, ApiError> {
    let ctx = request_context(&state, &headers)?;
    let outcome = state.service.revoke_certificate(&ctx, &serial).await?;
    Ok(Json(RevokeCertificateResponse::new(normalize_serial(&serial), outcome)))
}

#[instrument(skip(state, headers), name = "http_revoke_thing_certificates")]
pub async fn revoke_thing_certificates_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(thing_id): Path<String>,
) -> Result<Json<RevokeThingCertificatesResponse>, ApiError> {
    let ctx = request_context(&state, &headers)?;
    let thing_id = ThingId::parse(&thing_id)?;
    let summary = state.service.revoke_thing_certificates(&ctx, &thing_id).await?;
    Ok(Json(RevokeThingCertificatesResponse::new(thing_id.into_string(), summary)))
}

/// Unauthenticated liveness check. Always 200; component state is in the body.
pub async fn health_handler(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let health = state.service.health().await;
    (StatusCode::OK, Json(HealthResponse::from(health)))
}
