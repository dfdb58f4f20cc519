mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{memory_repository, InMemoryThings, ALICE, BOB};
use thingcerts::api::build_router;
use thingcerts::clients::JwtAuthorizationClient;
use thingcerts::config::AuthConfig;
use thingcerts::domain::{KeySpec, OwnerId};
use thingcerts::errors::ErrorKind;
use thingcerts::pki::MockSigningBackend;
use thingcerts::services::{CertificateService, IssuancePolicy};

struct TestApp {
    router: Router,
    backend: Arc<MockSigningBackend>,
    jwt: Arc<JwtAuthorizationClient>,
}

impl TestApp {
    async fn new() -> Self {
        let backend = Arc::new(MockSigningBackend::new());
        let jwt = Arc::new(JwtAuthorizationClient::new(&AuthConfig {
            jwt_secret: "integration-secret-integration-secret".into(),
            issuer: Some("things-auth".to_string()),
            audience: None,
        }));
        let things = Arc::new(
            InMemoryThings::default()
                .with_thing("thing-1", ALICE, "key-thing-1")
                .with_thing("thing-bob", BOB, "key-thing-bob"),
        );
        let service = Arc::new(CertificateService::new(
            jwt.clone(),
            things,
            backend.clone(),
            Arc::new(memory_repository().await),
            IssuancePolicy { default_key_spec: KeySpec::EcdsaP256, ..Default::default() },
        ));

        Self { router: build_router(service, StdDuration::from_secs(5)), backend, jwt }
    }

    fn token(&self, owner: &str) -> String {
        self.jwt.mint(&OwnerId::parse(owner).unwrap(), Duration::minutes(10)).unwrap()
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }
}

fn window(body: &Value) -> Duration {
    let not_before = DateTime::parse_from_rfc3339(body["not_before"].as_str().unwrap()).unwrap();
    let not_after = DateTime::parse_from_rfc3339(body["not_after"].as_str().unwrap()).unwrap();
    not_after - not_before
}

#[tokio::test]
async fn test_issue_get_list_and_revoke_over_http() {
    let app = TestApp::new().await;
    let token = app.token(ALICE);

    let (status, issued) = app
        .send(
            Method::POST,
            "/certs",
            Some(&token),
            Some(json!({"thing_id": "thing-1", "ttl": "24h", "key_type": "ecdsa"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(window(&issued), Duration::hours(24));
    assert!(issued["private_key"].as_str().unwrap().contains("PRIVATE KEY"));
    assert_eq!(issued["thing_id"], "thing-1");
    assert_eq!(issued["owner_id"], ALICE);
    let serial = issued["serial"].as_str().unwrap().to_string();

    let (status, fetched) = app.send(Method::GET, &format!("/certs/{}", serial), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fetched.get("private_key").is_none());
    assert_eq!(fetched["revoked"], false);

    let (status, revoked) =
        app.send(Method::POST, &format!("/certs/{}/revoke", serial), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revoked, json!({"serial": serial, "revoked": true, "already_revoked": false}));

    let (status, page) = app.send(Method::GET, "/certs?thing_id=thing-1", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["limit"], 10);
    assert_eq!(page["certificates"][0]["revoked"], true);
    assert!(page["certificates"][0].get("private_key").is_none());

    let (status, again) =
        app.send(Method::POST, &format!("/certs/{}/revoke", serial), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["already_revoked"], true);
}

#[tokio::test]
async fn test_missing_or_bad_tokens_are_unauthorized() {
    let app = TestApp::new().await;

    let (status, body) = app.send(Method::GET, "/certs", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = app.send(Method::GET, "/certs", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let expired = app.jwt.mint(&OwnerId::parse(ALICE).unwrap(), Duration::hours(-2)).unwrap();
    let (status, body) = app.send(Method::GET, "/certs", Some(&expired), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().contains("expired"));
}

#[tokio::test]
async fn test_invalid_requests_are_bad_requests() {
    let app = TestApp::new().await;
    let token = app.token(ALICE);

    for body in [
        json!({"thing_id": "thing-1", "ttl": "forever"}),
        json!({"thing_id": "thing-1", "ttl": "0s"}),
        json!({"thing_id": "thing-1", "key_type": "rsa", "key_bits": 1024}),
        json!({"thing_id": "thing-1", "key_type": "dsa"}),
        json!({"thing_id": "thing-1", "key_bits": 4096}),
        json!({"thing_id": ""}),
        json!({"ttl": "24h"}),
    ] {
        let (status, response) = app.send(Method::POST, "/certs", Some(&token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {} -> {}", body, response);
    }

    let (status, _) = app.send(Method::GET, "/certs?limit=1000", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.backend.issue_calls(), 0);
}

#[tokio::test]
async fn test_ownership_is_enforced() {
    let app = TestApp::new().await;
    let alice = app.token(ALICE);
    let bob = app.token(BOB);

    let (status, _) = app
        .send(Method::POST, "/certs", Some(&alice), Some(json!({"thing_id": "thing-bob"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, issued) = app
        .send(Method::POST, "/certs", Some(&alice), Some(json!({"thing_id": "thing-1"})))
        .await;
    let serial = issued["serial"].as_str().unwrap();

    let (status, _) = app.send(Method::GET, &format!("/certs/{}", serial), Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) =
        app.send(Method::POST, &format!("/certs/{}/revoke", serial), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_backend_errors_map_to_gateway_statuses() {
    let app = TestApp::new().await;
    let token = app.token(ALICE);

    app.backend.fail_next_issue(ErrorKind::BackendTransient);
    let (status, body) = app
        .send(Method::POST, "/certs", Some(&token), Some(json!({"thing_id": "thing-1"})))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(!body["message"].as_str().unwrap().contains("injected"));

    app.backend.fail_next_issue(ErrorKind::BackendPermanent);
    let (status, body) = app
        .send(Method::POST, "/certs", Some(&token), Some(json!({"thing_id": "thing-1"})))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");
}

#[tokio::test]
async fn test_revoke_all_certificates_of_a_thing() {
    let app = TestApp::new().await;
    let token = app.token(ALICE);

    for _ in 0..2 {
        let (status, _) = app
            .send(Method::POST, "/certs", Some(&token), Some(json!({"thing_id": "thing-1"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app.send(Method::POST, "/things/thing-1/certs/revoke", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["thing_id"], "thing-1");
    assert_eq!(body["revoked"].as_array().unwrap().len(), 2);

    let (status, _) = app.send(Method::POST, "/things/unknown/certs/revoke", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new().await;
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "mock");
}
