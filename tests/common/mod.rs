//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;
use time::OffsetDateTime;

use thingcerts::clients::{AuthorizationClient, ThingDirectoryClient};
use thingcerts::domain::{
    CertificatePage, CertificateRecord, KeySpec, OwnerId, PageRequest, RevocationOutcome,
    ThingId, ThingIdentity,
};
use thingcerts::errors::{AuthErrorType, CertsError, Result};
use thingcerts::pki::SigningBackend;
use thingcerts::services::{CertificateService, IssuancePolicy, RequestContext};
use thingcerts::storage::{run_migrations, CertificateRepository, SqlxCertificateRepository};

pub const ALICE: &str = "alice@example.com";
pub const BOB: &str = "bob@example.com";

/// Treats the token as the owner id. `expired` and an empty token are rejected.
pub struct TokenIsOwner;

#[async_trait]
impl AuthorizationClient for TokenIsOwner {
    async fn identify(&self, token: &str) -> Result<OwnerId> {
        match token {
            "" => Err(CertsError::authorization("Missing bearer token", AuthErrorType::MissingToken)),
            "expired" => Err(CertsError::authorization("Token expired", AuthErrorType::ExpiredToken)),
            owner => OwnerId::parse(owner),
        }
    }
}

/// In-memory thing directory keyed by thing id.
#[derive(Default)]
pub struct InMemoryThings {
    things: Mutex<HashMap<String, (String, String)>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl InMemoryThings {
    pub fn with_thing(self, thing_id: &str, owner: &str, key: &str) -> Self {
        self.things
            .lock()
            .unwrap()
            .insert(thing_id.to_string(), (owner.to_string(), key.to_string()));
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThingDirectoryClient for InMemoryThings {
    async fn resolve(&self, thing_id: &ThingId, owner: &OwnerId) -> Result<ThingIdentity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let entry = self.things.lock().unwrap().get(thing_id.as_str()).cloned();
        match entry {
            Some((thing_owner, key)) if thing_owner == owner.as_str() => Ok(ThingIdentity {
                thing_id: thing_id.clone(),
                owner_id: owner.clone(),
                external_key: key,
            }),
            _ => Err(CertsError::not_found("Thing", thing_id.as_str())),
        }
    }
}

/// Wraps the real store and injects save failures or latency.
pub struct FlakyRepository {
    inner: SqlxCertificateRepository,
    fail_saves: AtomicBool,
    save_delay: Mutex<Option<Duration>>,
}

impl FlakyRepository {
    pub fn new(inner: SqlxCertificateRepository) -> Self {
        Self { inner, fail_saves: AtomicBool::new(false), save_delay: Mutex::new(None) }
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl CertificateRepository for FlakyRepository {
    async fn save(&self, record: &CertificateRecord) -> Result<()> {
        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CertsError::persistence_message("database is locked"));
        }
        self.inner.save(record).await
    }

    async fn find_by_serial(&self, serial: &str) -> Result<CertificateRecord> {
        self.inner.find_by_serial(serial).await
    }

    async fn find_by_thing(
        &self,
        owner_id: &OwnerId,
        thing_id: &ThingId,
        page: PageRequest,
    ) -> Result<CertificatePage> {
        self.inner.find_by_thing(owner_id, thing_id, page).await
    }

    async fn find_by_owner(&self, owner_id: &OwnerId, page: PageRequest) -> Result<CertificatePage> {
        self.inner.find_by_owner(owner_id, page).await
    }

    async fn find_active_by_thing(
        &self,
        owner_id: &OwnerId,
        thing_id: &ThingId,
    ) -> Result<Vec<CertificateRecord>> {
        self.inner.find_active_by_thing(owner_id, thing_id).await
    }

    async fn mark_revoked(&self, serial: &str, at: DateTime<Utc>) -> Result<RevocationOutcome> {
        self.inner.mark_revoked(serial, at).await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}

pub async fn memory_repository() -> SqlxCertificateRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    run_migrations(&pool).await.expect("Failed to run migrations");
    SqlxCertificateRepository::new(pool)
}

/// Everything a service test needs, with handles to the fakes.
pub struct Harness {
    pub service: Arc<CertificateService>,
    pub things: Arc<InMemoryThings>,
    pub repository: Arc<FlakyRepository>,
}

pub async fn harness(backend: Arc<dyn SigningBackend>) -> Harness {
    let things = Arc::new(
        InMemoryThings::default()
            .with_thing("thing-1", ALICE, "key-thing-1")
            .with_thing("thing-2", ALICE, "key-thing-2")
            .with_thing("thing-bob", BOB, "key-thing-bob"),
    );
    let repository = Arc::new(FlakyRepository::new(memory_repository().await));
    let policy = IssuancePolicy {
        default_key_spec: KeySpec::EcdsaP256,
        compensation_timeout: Duration::from_secs(2),
        ..Default::default()
    };

    let service = Arc::new(CertificateService::new(
        Arc::new(TokenIsOwner),
        things.clone(),
        backend,
        repository.clone(),
        policy,
    ));

    Harness { service, things, repository }
}

pub fn ctx(owner: &str) -> RequestContext {
    RequestContext::new(owner, Duration::from_secs(5))
}

pub fn thing(id: &str) -> ThingId {
    ThingId::parse(id).unwrap()
}

/// A self-signed P-256 CA written to a temporary directory.
pub struct TestCa {
    pub dir: TempDir,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_pem: String,
}

pub fn make_ca(valid_days: i64) -> TestCa {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, "Integration Test CA");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let now = OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(1);
    params.not_after = now + time::Duration::days(valid_days);
    let cert = params.self_signed(&key).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("ca.crt");
    let key_path = dir.path().join("ca.key");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key.serialize_pem()).unwrap();

    TestCa { dir, cert_path, key_path, cert_pem: cert.pem() }
}
