//! HSDS v3.1.1 entities, summarized to the attributes the pipeline reads or
//! writes. Each primary entity (Organization, Location, Service) has a
//! canonical row and a source row; subordinate entities (Address, Phone, ...)
//! are keyed by whichever parent id they were attached to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::validation::{ValidationNote, ValidationStatus};

fn validation_attrs_from_row(row: &PgRow) -> Result<ValidationAttrs, sqlx::Error> {
    Ok(ValidationAttrs {
        confidence_score: row.try_get("confidence_score")?,
        validation_status: row.try_get("validation_status")?,
        validation_notes: row.try_get::<Json<Vec<ValidationNote>>, _>("validation_notes")?.0,
        geocoding_source: row.try_get("geocoding_source")?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Physical,
    Postal,
    Virtual,
}

/// Not derived via `sqlx::Type` because the `TemporarilyClosed` variant's
/// wire/DB value contains a space (`"temporarily closed"`), which the
/// `rename_all` helper can't express — see `as_str`/`parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Defunct,
    #[serde(rename = "temporarily closed")]
    TemporarilyClosed,
}

impl ServiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Defunct => "defunct",
            ServiceStatus::TemporarilyClosed => "temporarily closed",
        }
    }
}

impl std::str::FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ServiceStatus::Active),
            "inactive" => Ok(ServiceStatus::Inactive),
            "defunct" => Ok(ServiceStatus::Defunct),
            "temporarily closed" => Ok(ServiceStatus::TemporarilyClosed),
            other => Err(format!("unknown service status: {other}")),
        }
    }
}

/// Fields shared by every canonical primary entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationAttrs {
    pub confidence_score: i16,
    pub validation_status: ValidationStatus,
    pub validation_notes: Vec<ValidationNote>,
    pub geocoding_source: Option<String>,
}

impl Default for ValidationAttrs {
    fn default() -> Self {
        Self {
            confidence_score: 0,
            validation_status: ValidationStatus::NeedsReview,
            validation_notes: Vec::new(),
            geocoding_source: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub normalized_name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub email: Option<String>,
    pub year_incorporated: Option<i32>,
    pub legal_status: Option<String>,
    pub tax_id: Option<String>,
    pub parent_org_id: Option<Uuid>,
    #[serde(flatten)]
    pub validation: ValidationAttrs,
}

impl Organization {
    /// Build a canonical org from a source observation, assigning a fresh id.
    pub fn from_source(source: &OrganizationSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: source.name.clone(),
            normalized_name: crate::normalized_name(&source.name),
            description: source.description.clone(),
            url: source.url.clone(),
            email: source.email.clone(),
            year_incorporated: source.year_incorporated,
            legal_status: source.legal_status.clone(),
            tax_id: source.tax_id.clone(),
            parent_org_id: source.parent_org_id,
            validation: ValidationAttrs::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSource {
    pub id: Uuid,
    pub canonical_id: Uuid,
    pub scraper_id: String,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub email: Option<String>,
    pub year_incorporated: Option<i32>,
    pub legal_status: Option<String>,
    pub tax_id: Option<String>,
    pub parent_org_id: Option<Uuid>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub location_type: LocationType,
    pub external_identifier: Option<String>,
    #[serde(flatten)]
    pub validation: ValidationAttrs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSource {
    pub id: Uuid,
    pub canonical_id: Option<Uuid>,
    pub scraper_id: String,
    pub organization_id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_type: LocationType,
    pub external_identifier: Option<String>,
    pub postal_code: Option<String>,
    pub state: Option<String>,
    pub observed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub validation: ValidationAttrs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ServiceStatus,
    pub eligibility_description: Option<String>,
    #[serde(flatten)]
    pub validation: ValidationAttrs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSource {
    pub id: Uuid,
    pub canonical_id: Uuid,
    pub scraper_id: String,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ServiceStatus,
    pub eligibility_description: Option<String>,
    /// The Location this observation was scraped alongside, if any. Used by
    /// the reconciler's rejection gate to decide whether the service can be
    /// canonicalized when its location was rejected.
    pub location_id: Option<Uuid>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAtLocation {
    pub id: Uuid,
    pub service_id: Uuid,
    pub location_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub location_id: Uuid,
    pub address_1: String,
    pub city: String,
    pub state_province: String,
    pub postal_code: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phone {
    pub id: Uuid,
    pub location_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub number: String,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub service_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub freq: String,
    pub opens_at: Option<String>,
    pub closes_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    pub id: Uuid,
    pub service_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceArea {
    pub id: Uuid,
    pub service_id: Uuid,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accessibility {
    pub id: Uuid,
    pub location_id: Uuid,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taxonomy {
    pub id: Uuid,
    pub term: String,
    pub taxonomy: String,
}

/// The full HSDS-shaped payload produced by the aligner and carried through
/// validation and reconciliation. Subordinate entities are embedded rather
/// than separately queued since a single content payload usually describes
/// one organization with a handful of locations/services.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HsdsPayload {
    pub organization: Option<OrganizationDraft>,
    pub locations: Vec<LocationDraft>,
    pub services: Vec<ServiceDraft>,
}

/// Pre-canonicalization draft of an Organization: no id assigned yet, no
/// validation attributes until the validator has run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrganizationDraft {
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub email: Option<String>,
    pub year_incorporated: Option<i32>,
    pub legal_status: Option<String>,
    pub tax_id: Option<String>,
    pub parent_org_id: Option<Uuid>,
    #[serde(default)]
    pub validation: ValidationAttrs,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocationDraft {
    pub name: Option<String>,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    #[serde(default)]
    pub location_type: Option<LocationType>,
    pub external_identifier: Option<String>,
    #[serde(default)]
    pub validation: ValidationAttrs,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceDraft {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<ServiceStatus>,
    pub eligibility_description: Option<String>,
    /// Index into `HsdsPayload::locations`, set by the aligner when the
    /// source content associates this service with a specific location.
    pub location_index: Option<usize>,
    #[serde(default)]
    pub validation: ValidationAttrs,
}

// Hand-written rather than `#[derive(sqlx::FromRow)]`: `ValidationAttrs` is
// stored across four flat columns (`confidence_score`, `validation_status`,
// `validation_notes`, `geocoding_source`) rather than one column of its
// own, which the derive has no attribute for.
impl<'r> sqlx::FromRow<'r, PgRow> for Organization {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            normalized_name: row.try_get("normalized_name")?,
            description: row.try_get("description")?,
            url: row.try_get("url")?,
            email: row.try_get("email")?,
            year_incorporated: row.try_get("year_incorporated")?,
            legal_status: row.try_get("legal_status")?,
            tax_id: row.try_get("tax_id")?,
            parent_org_id: row.try_get("parent_org_id")?,
            validation: validation_attrs_from_row(row)?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Location {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            location_type: row.try_get("location_type")?,
            external_identifier: row.try_get("external_identifier")?,
            validation: validation_attrs_from_row(row)?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Service {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            status: status.parse().map_err(|e| sqlx::Error::ColumnDecode { index: "status".to_string(), source: Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)) })?,
            eligibility_description: row.try_get("eligibility_description")?,
            validation: validation_attrs_from_row(row)?,
        })
    }
}
