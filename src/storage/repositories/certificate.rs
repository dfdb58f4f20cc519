//! Certificate repository.
//!
//! Records are keyed by serial and never deleted. After insert only the
//! revocation columns change, and only from "active" to "revoked". Private
//! keys are not stored; fetched records never carry one.

use crate::domain::{
    BackendKind, CertificatePage, CertificateRecord, OwnerId, PageRequest, RevocationOutcome,
    ThingId,
};
use crate::errors::{CertsError, Result};
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::FromRow;
use tracing::instrument;

/// Parse a timestamp string that may be in RFC 3339 format (from application)
/// or SQLite datetime format (from manual repairs with `datetime('now')`).
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    Err(CertsError::persistence_message(format!("Invalid timestamp format: {}", s)))
}

/// Fixed-width form so that TEXT ordering matches chronological ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ============================================================================
// Database Row Type
// ============================================================================

#[derive(Debug, Clone, FromRow)]
struct CertificateRow {
    serial: String,
    thing_id: String,
    owner_id: String,
    certificate_pem: String,
    ca_chain_pem: Option<String>,
    key_type: String,
    not_before: String,
    not_after: String,
    revoked: bool,
    revoked_at: Option<String>,
    backend: String,
    created_at: String,
}

impl TryFrom<CertificateRow> for CertificateRecord {
    type Error = CertsError;

    fn try_from(row: CertificateRow) -> Result<Self> {
        let backend = row.backend.parse::<BackendKind>().map_err(|_| {
            CertsError::persistence_message(format!(
                "Unknown backend '{}' stored for certificate {}",
                row.backend, row.serial
            ))
        })?;

        Ok(CertificateRecord {
            not_before: parse_timestamp(&row.not_before)?,
            not_after: parse_timestamp(&row.not_after)?,
            created_at: parse_timestamp(&row.created_at)?,
            revoked_at: row.revoked_at.map(|s| parse_timestamp(&s)).transpose()?,
            serial: row.serial,
            thing_id: ThingId::from_string(row.thing_id),
            owner_id: OwnerId::from_string(row.owner_id),
            certificate_pem: row.certificate_pem,
            private_key_pem: None,
            ca_chain_pem: row.ca_chain_pem,
            key_type: row.key_type,
            revoked: row.revoked,
            backend,
        })
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait CertificateRepository: Send + Sync {
    /// Insert a new record. A serial that is already stored is a `Conflict`.
    async fn save(&self, record: &CertificateRecord) -> Result<()>;

    async fn find_by_serial(&self, serial: &str) -> Result<CertificateRecord>;

    /// Certificates of one thing, newest first.
    async fn find_by_thing(
        &self,
        owner_id: &OwnerId,
        thing_id: &ThingId,
        page: PageRequest,
    ) -> Result<CertificatePage>;

    /// All certificates of an owner, newest first.
    async fn find_by_owner(&self, owner_id: &OwnerId, page: PageRequest)
        -> Result<CertificatePage>;

    /// Every certificate of a thing that is not yet revoked.
    async fn find_active_by_thing(
        &self,
        owner_id: &OwnerId,
        thing_id: &ThingId,
    ) -> Result<Vec<CertificateRecord>>;

    /// Flip a record to revoked. Revoking twice reports `AlreadyRevoked` and
    /// keeps the original `revoked_at`.
    async fn mark_revoked(&self, serial: &str, at: DateTime<Utc>) -> Result<RevocationOutcome>;

    async fn health_check(&self) -> Result<()>;
}

// ============================================================================
// SQLx Implementation
// ============================================================================

#[derive(Debug, Clone)]
pub struct SqlxCertificateRepository {
    pool: DbPool,
}

impl SqlxCertificateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl CertificateRepository for SqlxCertificateRepository {
    #[instrument(skip(self, record), fields(serial = %record.serial, thing_id = %record.thing_id), name = "db_save_certificate")]
    async fn save(&self, record: &CertificateRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO certificates (
                serial, thing_id, owner_id, certificate_pem, ca_chain_pem,
                key_type, not_before, not_after, revoked, revoked_at, backend, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&record.serial)
        .bind(record.thing_id.as_str())
        .bind(record.owner_id.as_str())
        .bind(&record.certificate_pem)
        .bind(record.ca_chain_pem.as_deref())
        .bind(&record.key_type)
        .bind(format_timestamp(&record.not_before))
        .bind(format_timestamp(&record.not_after))
        .bind(record.revoked)
        .bind(record.revoked_at.as_ref().map(format_timestamp))
        .bind(record.backend.as_str())
        .bind(format_timestamp(&record.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CertsError::conflict(
                    format!("Certificate with serial '{}' already exists", record.serial),
                    "Certificate",
                )
            } else {
                CertsError::persistence(
                    format!("Failed to save certificate: {}", record.serial),
                    e,
                )
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(serial = %serial), name = "db_find_certificate_by_serial")]
    async fn find_by_serial(&self, serial: &str) -> Result<CertificateRecord> {
        let row =
            sqlx::query_as::<_, CertificateRow>("SELECT * FROM certificates WHERE serial = $1")
                .bind(serial)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    CertsError::persistence(
                        format!("Failed to fetch certificate by serial: {}", serial),
                        e,
                    )
                })?;

        match row {
            Some(row) => row.try_into(),
            None => Err(CertsError::not_found("Certificate", serial)),
        }
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, thing_id = %thing_id, offset = page.offset, limit = page.limit), name = "db_list_certificates_by_thing")]
    async fn find_by_thing(
        &self,
        owner_id: &OwnerId,
        thing_id: &ThingId,
        page: PageRequest,
    ) -> Result<CertificatePage> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM certificates WHERE owner_id = $1 AND thing_id = $2",
        )
        .bind(owner_id.as_str())
        .bind(thing_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            CertsError::persistence(format!("Failed to count certificates for thing: {}", thing_id), e)
        })?;

        let rows = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT * FROM certificates
            WHERE owner_id = $1 AND thing_id = $2
            ORDER BY created_at DESC, serial ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(owner_id.as_str())
        .bind(thing_id.as_str())
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            CertsError::persistence(format!("Failed to list certificates for thing: {}", thing_id), e)
        })?;

        build_page(total, page, rows)
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, offset = page.offset, limit = page.limit), name = "db_list_certificates_by_owner")]
    async fn find_by_owner(
        &self,
        owner_id: &OwnerId,
        page: PageRequest,
    ) -> Result<CertificatePage> {
        let total =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM certificates WHERE owner_id = $1")
                .bind(owner_id.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    CertsError::persistence(
                        format!("Failed to count certificates for owner: {}", owner_id),
                        e,
                    )
                })?;

        let rows = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT * FROM certificates
            WHERE owner_id = $1
            ORDER BY created_at DESC, serial ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner_id.as_str())
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            CertsError::persistence(format!("Failed to list certificates for owner: {}", owner_id), e)
        })?;

        build_page(total, page, rows)
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, thing_id = %thing_id), name = "db_list_active_certificates_by_thing")]
    async fn find_active_by_thing(
        &self,
        owner_id: &OwnerId,
        thing_id: &ThingId,
    ) -> Result<Vec<CertificateRecord>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT * FROM certificates
            WHERE owner_id = $1 AND thing_id = $2 AND revoked = 0
            ORDER BY created_at ASC, serial ASC
            "#,
        )
        .bind(owner_id.as_str())
        .bind(thing_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            CertsError::persistence(
                format!("Failed to list active certificates for thing: {}", thing_id),
                e,
            )
        })?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    #[instrument(skip(self), fields(serial = %serial), name = "db_mark_certificate_revoked")]
    async fn mark_revoked(&self, serial: &str, at: DateTime<Utc>) -> Result<RevocationOutcome> {
        let result = sqlx::query(
            "UPDATE certificates SET revoked = 1, revoked_at = $2 WHERE serial = $1 AND revoked = 0",
        )
        .bind(serial)
        .bind(format_timestamp(&at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            CertsError::persistence(format!("Failed to revoke certificate: {}", serial), e)
        })?;

        if result.rows_affected() == 1 {
            return Ok(RevocationOutcome::Revoked);
        }

        // Nothing changed: either the serial is unknown or it was revoked already.
        let existing = self.find_by_serial(serial).await?;
        if existing.revoked {
            Ok(RevocationOutcome::AlreadyRevoked)
        } else {
            Err(CertsError::persistence_message(format!(
                "Certificate {} could not be marked revoked",
                serial
            )))
        }
    }

    #[instrument(skip(self), name = "db_health_check")]
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            CertsError::persistence("Database connectivity check failed", e)
        })?;
        Ok(())
    }
}

fn build_page(total: i64, page: PageRequest, rows: Vec<CertificateRow>) -> Result<CertificatePage> {
    let certificates = rows.into_iter().map(|r| r.try_into()).collect::<Result<Vec<_>>>()?;
    Ok(CertificatePage {
        total: u64::try_from(total).unwrap_or(0),
        offset: page.offset,
        limit: page.limit,
        certificates,
    })
}
