//! Reconciler — matches source observations against canonical
//! Organization/Location/Service rows, merges them field-by-field, and
//! maintains the `record_versions` history.
//!
//! Grounded on the teacher's row-level model (`rootsignal-domains/src/
//! entities/models/entity.rs`): a struct wrapping a `PgPool`, async methods
//! built on `sqlx::query_as::<_, Self>`, and an `ON CONFLICT` upsert for the
//! unconditional source-record write. The match/merge/version orchestration
//! itself has no teacher analogue — the teacher dedups signals by
//! embedding similarity (`rootsignal-scout/src/pipeline/handlers/dedup.rs`),
//! this generalizes the same "match, then fold into what already exists"
//! shape onto compound-key and spatial HSDS matching instead.

mod matching;
mod merge;

use std::time::Duration;

use pantry_domain::{
    HsdsPayload, Location, LocationDraft, Organization, OrganizationDraft, RecordVersion, Service, ServiceDraft,
    ValidationStatus,
};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ReconcilerError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ReconcilerError>;

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub organization_id: Option<Uuid>,
    pub location_ids: Vec<Uuid>,
    pub service_ids: Vec<Uuid>,
    pub rejected_locations: usize,
    pub rejected_services: usize,
}

pub struct Reconciler {
    pool: PgPool,
    org_proximity_miles: f64,
    location_tolerance_meters: f64,
    rejection_threshold: i16,
    db_max_retries: u32,
}

impl Reconciler {
    pub fn new(pool: PgPool, org_proximity_miles: f64, location_tolerance_meters: f64, rejection_threshold: i16, db_max_retries: u32) -> Self {
        Self { pool, org_proximity_miles, location_tolerance_meters, rejection_threshold, db_max_retries }
    }

    pub async fn reconcile(&self, payload: &HsdsPayload, scraper_id: &str) -> Result<ReconcileOutcome> {
        let org_draft = payload
            .organization
            .as_ref()
            .ok_or_else(|| ReconcilerError::Malformed("payload has no organization".to_string()))?;
        if org_draft.name.trim().is_empty() {
            return Err(ReconcilerError::Malformed("organization name is empty".to_string()));
        }

        // Session-level advisory lock held on a dedicated connection for the
        // whole match/merge/write sequence below, not just its acquisition —
        // an xact-scoped lock would release the instant that transaction
        // committed, before any of the actual reconciliation ran, and let
        // two concurrent calls for the same organization interleave freely.
        let lock_key = advisory_lock_key(&pantry_domain::normalized_name(&org_draft.name));
        let mut lock_conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)").bind(lock_key).execute(&mut *lock_conn).await?;

        let result = self.reconcile_locked(payload, org_draft, scraper_id).await;

        if let Err(err) = sqlx::query("SELECT pg_advisory_unlock($1)").bind(lock_key).execute(&mut *lock_conn).await {
            warn!(%err, "failed to release reconciler advisory lock");
        }

        result
    }

    async fn reconcile_locked(&self, payload: &HsdsPayload, org_draft: &OrganizationDraft, scraper_id: &str) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        let candidate_location = payload.locations.first().and_then(|loc| Some((loc.latitude?, loc.longitude?)));
        let mut attempt = 0;
        let organization_id = loop {
            match self.reconcile_organization(org_draft, candidate_location, scraper_id).await {
                Ok(id) => break id,
                Err(err) => self.retry_or_raise("organization", &mut attempt, err).await?,
            }
        };
        outcome.organization_id = Some(organization_id);

        let mut location_canonical_ids: Vec<Option<Uuid>> = Vec::with_capacity(payload.locations.len());
        for location in &payload.locations {
            let rejected = is_rejected(&location.validation.validation_status, location.validation.confidence_score, self.rejection_threshold);
            if rejected {
                self.upsert_location_source(location, organization_id, scraper_id, None).await?;
                location_canonical_ids.push(None);
                outcome.rejected_locations += 1;
                continue;
            }

            let mut attempt = 0;
            let canonical_id = loop {
                match self.reconcile_location(location, organization_id, scraper_id).await {
                    Ok(id) => break id,
                    Err(err) => self.retry_or_raise("location", &mut attempt, err).await?,
                }
            };
            location_canonical_ids.push(Some(canonical_id));
            outcome.location_ids.push(canonical_id);
        }

        for service in &payload.services {
            let blocked_by_location = service
                .location_index
                .and_then(|idx| location_canonical_ids.get(idx))
                .map(|canonical| canonical.is_none())
                .unwrap_or(false);

            if blocked_by_location {
                outcome.rejected_services += 1;
                info!(service = %service.name, "service not canonicalized, its location was rejected");
                continue;
            }

            let location_id = service.location_index.and_then(|idx| location_canonical_ids.get(idx).copied().flatten());
            let mut attempt = 0;
            let canonical_id = loop {
                match self.reconcile_service(service, organization_id, location_id, scraper_id).await {
                    Ok(id) => break id,
                    Err(err) => self.retry_or_raise("service", &mut attempt, err).await?,
                }
            };
            outcome.service_ids.push(canonical_id);
        }

        Ok(outcome)
    }

    /// Called when a reconcile step for one record fails. Row-level
    /// constraint conflicts (unique/serialization violations) are logged to
    /// `reconciler_constraint_violations` and backed off up to
    /// `db_max_retries`, returning `Ok(())` so the caller's loop retries.
    /// Any other error — including a conflict past the retry budget —
    /// propagates, which drives the worker's nack/DLQ handling.
    async fn retry_or_raise(&self, record_kind: &str, attempt: &mut u32, err: ReconcilerError) -> Result<()> {
        match err {
            ReconcilerError::Db(sqlx::Error::Database(db_err)) if is_retryable(db_err.as_ref()) && *attempt < self.db_max_retries => {
                *attempt += 1;
                let reason = db_err.message().to_string();
                self.log_constraint_violation(record_kind, &reason).await;
                warn!(record_kind, attempt = *attempt, reason, "row-level conflict, retrying");
                tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(*attempt))).await;
                Ok(())
            }
            other => Err(other),
        }
    }

    async fn log_constraint_violation(&self, record_kind: &str, reason: &str) {
        let result = sqlx::query(
            "INSERT INTO reconciler_constraint_violations (record_kind, reason, occurred_at) VALUES ($1, $2, NOW())",
        )
        .bind(record_kind)
        .bind(reason)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            warn!(error = %err, "failed to log constraint violation, continuing anyway");
        }
    }

    async fn reconcile_organization(&self, draft: &OrganizationDraft, candidate_location: Option<(f64, f64)>, scraper_id: &str) -> Result<Uuid> {
        let normalized = pantry_domain::normalized_name(&draft.name);

        sqlx::query(
            r#"
            INSERT INTO organizations_source
                (id, canonical_id, scraper_id, name, description, url, email, year_incorporated, legal_status, tax_id, parent_org_id, observed_at)
            VALUES ($1, NULL, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(scraper_id)
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(&draft.url)
        .bind(&draft.email)
        .bind(draft.year_incorporated)
        .bind(&draft.legal_status)
        .bind(&draft.tax_id)
        .bind(draft.parent_org_id)
        .execute(&self.pool)
        .await?;

        let (candidate_lat, candidate_lon) = match candidate_location {
            Some((lat, lon)) => (Some(lat), Some(lon)),
            None => (None, None),
        };
        let existing = matching::find_organization_match(&self.pool, &normalized, candidate_lat, candidate_lon, self.org_proximity_miles).await?;

        match existing {
            None => {
                let org = sqlx::query_as::<_, Organization>(
                    r#"
                    INSERT INTO organizations
                        (id, name, normalized_name, description, url, email, year_incorporated, legal_status, tax_id, parent_org_id,
                         confidence_score, validation_status, validation_notes, geocoding_source)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(&draft.name)
                .bind(&normalized)
                .bind(&draft.description)
                .bind(&draft.url)
                .bind(&draft.email)
                .bind(draft.year_incorporated)
                .bind(&draft.legal_status)
                .bind(&draft.tax_id)
                .bind(draft.parent_org_id)
                .bind(draft.validation.confidence_score)
                .bind(draft.validation.validation_status)
                .bind(serde_json::to_value(&draft.validation.validation_notes).unwrap_or_default())
                .bind(&draft.validation.geocoding_source)
                .fetch_one(&self.pool)
                .await?;

                self.write_version(org.id, pantry_domain::version::RecordType::Organization, &org, 1).await?;
                info!(organization_id = %org.id, name = %org.name, "created canonical organization");
                Ok(org.id)
            }
            Some(current) => {
                let incoming_confidence = draft.validation.confidence_score;
                let name = merge::by_provenance(
                    (current.name.clone(), current.validation.confidence_score),
                    (draft.name.clone(), incoming_confidence),
                );
                let merged = Organization {
                    id: current.id,
                    normalized_name: pantry_domain::normalized_name(&name),
                    name,
                    description: merge::longest_non_redundant(current.description.clone(), draft.description.clone()),
                    url: merge::non_empty_over_empty(current.url.clone(), draft.url.clone()),
                    email: merge::non_empty_over_empty(current.email.clone(), draft.email.clone()),
                    year_incorporated: current.year_incorporated.or(draft.year_incorporated),
                    legal_status: merge::non_empty_over_empty(current.legal_status.clone(), draft.legal_status.clone()),
                    tax_id: merge::non_empty_over_empty(current.tax_id.clone(), draft.tax_id.clone()),
                    parent_org_id: current.parent_org_id.or(draft.parent_org_id),
                    validation: pantry_domain::ValidationAttrs {
                        confidence_score: current.validation.confidence_score.max(incoming_confidence),
                        ..current.validation.clone()
                    },
                };

                if fields_equal(&current, &merged) {
                    return Ok(current.id);
                }

                sqlx::query(
                    r#"
                    UPDATE organizations SET
                        name = $2, normalized_name = $3, description = $4, url = $5, email = $6,
                        year_incorporated = $7, legal_status = $8, tax_id = $9, parent_org_id = $10, confidence_score = $11
                    WHERE id = $1
                    "#,
                )
                .bind(merged.id)
                .bind(&merged.name)
                .bind(&merged.normalized_name)
                .bind(&merged.description)
                .bind(&merged.url)
                .bind(&merged.email)
                .bind(merged.year_incorporated)
                .bind(&merged.legal_status)
                .bind(&merged.tax_id)
                .bind(merged.parent_org_id)
                .bind(merged.validation.confidence_score)
                .execute(&self.pool)
                .await?;

                let next = self.next_version_num(merged.id).await?;
                self.write_version(merged.id, pantry_domain::version::RecordType::Organization, &merged, next).await?;
                info!(organization_id = %merged.id, version = next, "merged organization");
                Ok(merged.id)
            }
        }
    }

    async fn upsert_location_source(&self, draft: &LocationDraft, organization_id: Uuid, scraper_id: &str, canonical_id: Option<Uuid>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO locations_source
                (id, canonical_id, scraper_id, organization_id, name, description, latitude, longitude,
                 location_type, external_identifier, postal_code, state, observed_at,
                 confidence_score, validation_status, validation_notes, geocoding_source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), $13, $14, $15, $16)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(canonical_id)
        .bind(scraper_id)
        .bind(organization_id)
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(draft.location_type.unwrap_or(pantry_domain::LocationType::Physical))
        .bind(&draft.external_identifier)
        .bind(&draft.postal_code)
        .bind(&draft.state)
        .bind(draft.validation.confidence_score)
        .bind(draft.validation.validation_status)
        .bind(serde_json::to_value(&draft.validation.validation_notes).unwrap_or_default())
        .bind(&draft.validation.geocoding_source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reconcile_location(&self, draft: &LocationDraft, organization_id: Uuid, scraper_id: &str) -> Result<Uuid> {
        let existing = matching::find_location_match(
            &self.pool,
            organization_id,
            draft.latitude,
            draft.longitude,
            draft.postal_code.as_deref(),
            draft.external_identifier.as_deref(),
            self.location_tolerance_meters,
        )
        .await?;

        let canonical_id = match existing {
            None => {
                let lat = draft.latitude.ok_or_else(|| ReconcilerError::Malformed("location passed validation but has no latitude".to_string()))?;
                let lon = draft.longitude.ok_or_else(|| ReconcilerError::Malformed("location passed validation but has no longitude".to_string()))?;

                let loc = sqlx::query_as::<_, Location>(
                    r#"
                    INSERT INTO locations
                        (id, organization_id, name, description, latitude, longitude, location_type, external_identifier,
                         confidence_score, validation_status, validation_notes, geocoding_source)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(organization_id)
                .bind(&draft.name)
                .bind(&draft.description)
                .bind(lat)
                .bind(lon)
                .bind(draft.location_type.unwrap_or(pantry_domain::LocationType::Physical))
                .bind(&draft.external_identifier)
                .bind(draft.validation.confidence_score)
                .bind(draft.validation.validation_status)
                .bind(serde_json::to_value(&draft.validation.validation_notes).unwrap_or_default())
                .bind(&draft.validation.geocoding_source)
                .fetch_one(&self.pool)
                .await?;

                self.write_version(loc.id, pantry_domain::version::RecordType::Location, &loc, 1).await?;
                info!(location_id = %loc.id, "created canonical location");
                loc.id
            }
            Some(current) => {
                let (lat, lon) = match (draft.latitude, draft.longitude) {
                    (Some(lat), Some(lon)) => merge::weighted_centroid(
                        (current.latitude, current.longitude, current.validation.confidence_score),
                        (lat, lon, draft.validation.confidence_score),
                    ),
                    _ => (current.latitude, current.longitude),
                };

                let merged = Location {
                    id: current.id,
                    organization_id: current.organization_id,
                    name: merge::non_empty_over_empty(current.name.clone(), draft.name.clone()),
                    description: merge::longest_non_redundant(current.description.clone(), draft.description.clone()),
                    latitude: lat,
                    longitude: lon,
                    location_type: current.location_type,
                    external_identifier: merge::non_empty_over_empty(current.external_identifier.clone(), draft.external_identifier.clone()),
                    validation: current.validation.clone(),
                };

                let unchanged = current.name == merged.name
                    && current.description == merged.description
                    && current.latitude == merged.latitude
                    && current.longitude == merged.longitude
                    && current.external_identifier == merged.external_identifier;

                if unchanged {
                    current.id
                } else {
                    sqlx::query(
                        "UPDATE locations SET name = $2, description = $3, latitude = $4, longitude = $5, external_identifier = $6 WHERE id = $1",
                    )
                    .bind(merged.id)
                    .bind(&merged.name)
                    .bind(&merged.description)
                    .bind(merged.latitude)
                    .bind(merged.longitude)
                    .bind(&merged.external_identifier)
                    .execute(&self.pool)
                    .await?;

                    let next = self.next_version_num(merged.id).await?;
                    self.write_version(merged.id, pantry_domain::version::RecordType::Location, &merged, next).await?;
                    info!(location_id = %merged.id, version = next, "merged location");
                    merged.id
                }
            }
        };

        self.upsert_location_source(draft, organization_id, scraper_id, Some(canonical_id)).await?;
        Ok(canonical_id)
    }

    async fn reconcile_service(&self, draft: &ServiceDraft, organization_id: Uuid, location_id: Option<Uuid>, scraper_id: &str) -> Result<Uuid> {
        let status = draft.status.unwrap_or(pantry_domain::ServiceStatus::Active);

        sqlx::query(
            r#"
            INSERT INTO services_source
                (id, canonical_id, scraper_id, organization_id, name, description, status, eligibility_description, location_id, observed_at)
            VALUES ($1, NULL, $2, $3, $4, $5, $6, $7, $8, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(scraper_id)
        .bind(organization_id)
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(status.as_str())
        .bind(&draft.eligibility_description)
        .bind(location_id)
        .execute(&self.pool)
        .await?;

        let existing = matching::find_service_match(&self.pool, organization_id, &draft.name).await?;

        let service_id = match existing {
            None => {
                let svc = sqlx::query_as::<_, Service>(
                    r#"
                    INSERT INTO services
                        (id, organization_id, name, description, status, eligibility_description,
                         confidence_score, validation_status, validation_notes, geocoding_source)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(organization_id)
                .bind(&draft.name)
                .bind(&draft.description)
                .bind(status.as_str())
                .bind(&draft.eligibility_description)
                .bind(draft.validation.confidence_score)
                .bind(draft.validation.validation_status)
                .bind(serde_json::to_value(&draft.validation.validation_notes).unwrap_or_default())
                .bind(&draft.validation.geocoding_source)
                .fetch_one(&self.pool)
                .await?;

                self.write_version(svc.id, pantry_domain::version::RecordType::Service, &svc, 1).await?;
                info!(service_id = %svc.id, "created canonical service");
                svc.id
            }
            Some(current) => {
                let merged_description = merge::longest_non_redundant(current.description.clone(), draft.description.clone());
                if merged_description == current.description && current.status == status {
                    current.id
                } else {
                    sqlx::query("UPDATE services SET description = $2, status = $3 WHERE id = $1")
                        .bind(current.id)
                        .bind(&merged_description)
                        .bind(status.as_str())
                        .execute(&self.pool)
                        .await?;

                    let next = self.next_version_num(current.id).await?;
                    let merged = Service { description: merged_description, status, ..current.clone() };
                    self.write_version(merged.id, pantry_domain::version::RecordType::Service, &merged, next).await?;
                    info!(service_id = %merged.id, version = next, "merged service");
                    merged.id
                }
            }
        };

        if let Some(location_id) = location_id {
            sqlx::query(
                r#"
                INSERT INTO service_at_location (id, service_id, location_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (service_id, location_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(service_id)
            .bind(location_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(service_id)
    }

    async fn next_version_num(&self, record_id: Uuid) -> Result<i32> {
        let row = sqlx::query("SELECT COALESCE(MAX(version_num), 0) AS max_version FROM record_versions WHERE record_id = $1")
            .bind(record_id)
            .fetch_one(&self.pool)
            .await?;
        let max_version: i32 = row.try_get("max_version")?;
        Ok(max_version + 1)
    }

    async fn write_version<T: serde::Serialize>(&self, record_id: Uuid, record_type: pantry_domain::version::RecordType, data: &T, version_num: i32) -> Result<RecordVersion> {
        sqlx::query_as::<_, RecordVersion>(
            r#"
            INSERT INTO record_versions (id, record_id, record_type, version_num, data, created_at, created_by)
            VALUES ($1, $2, $3, $4, $5, NOW(), $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record_id)
        .bind(record_type)
        .bind(version_num)
        .bind(serde_json::to_value(data).unwrap_or_default())
        .bind("reconciler")
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }
}

/// Unique-violation, serialization-failure, and deadlock are the conflict
/// classes two concurrent reconcilers racing the same match key can hit;
/// anything else (bad SQL, missing table, constraint on a column we didn't
/// touch) is a bug, not a conflict, and should propagate immediately.
fn is_retryable(db_err: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    matches!(db_err.code().as_deref(), Some("23505") | Some("40001") | Some("40P01"))
}

fn is_rejected(status: &ValidationStatus, score: i16, rejection_threshold: i16) -> bool {
    matches!(status, ValidationStatus::Rejected) || score < rejection_threshold
}

fn fields_equal(current: &Organization, merged: &Organization) -> bool {
    current.name == merged.name
        && current.description == merged.description
        && current.url == merged.url
        && current.email == merged.email
        && current.year_incorporated == merged.year_incorporated
        && current.legal_status == merged.legal_status
        && current.tax_id == merged.tax_id
        && current.parent_org_id == merged.parent_org_id
        && current.validation.confidence_score == merged.validation.confidence_score
}

/// FNV-1a folded into a signed 64-bit key, since `pg_advisory_xact_lock`
/// takes a `bigint`.
fn advisory_lock_key(key: &str) -> i64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in key.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_lock_key_is_stable_for_the_same_input() {
        assert_eq!(advisory_lock_key("helping hands"), advisory_lock_key("helping hands"));
        assert_ne!(advisory_lock_key("helping hands"), advisory_lock_key("other org"));
    }

    #[test]
    fn rejected_status_is_rejected_regardless_of_score() {
        assert!(is_rejected(&ValidationStatus::Rejected, 90, 10));
    }

    #[test]
    fn score_below_threshold_is_rejected_even_if_status_is_needs_review() {
        assert!(is_rejected(&ValidationStatus::NeedsReview, 5, 10));
    }

    #[test]
    fn verified_above_threshold_is_not_rejected() {
        assert!(!is_rejected(&ValidationStatus::Verified, 80, 10));
    }
}
