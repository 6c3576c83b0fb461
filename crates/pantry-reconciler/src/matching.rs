//! Entity matching, grounded on the teacher's `find_by_name_and_type`/
//! `find_or_create` lookups (`rootsignal-domains/src/entities/models/entity.rs`)
//! generalized from exact-match lookups to the spatial and compound-key
//! match rules each HSDS entity needs.

use pantry_domain::{Location, Organization, Service};
use pantry_geocoding::{haversine_distance_meters, haversine_distance_miles};
use sqlx::PgPool;
use uuid::Uuid;

use crate::ReconcilerError;

/// Organizations matching a normalized name. Usually zero or one row; more
/// than one is possible if two distinct orgs happen to share a name, which
/// is why proximity is checked against each candidate rather than assuming
/// uniqueness.
async fn organizations_by_name(pool: &PgPool, normalized_name: &str) -> Result<Vec<Organization>, ReconcilerError> {
    sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE normalized_name = $1")
        .bind(normalized_name)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
}

async fn organization_has_location_within(
    pool: &PgPool,
    organization_id: Uuid,
    lat: f64,
    lon: f64,
    proximity_miles: f64,
) -> Result<bool, ReconcilerError> {
    let locations = sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE organization_id = $1")
        .bind(organization_id)
        .fetch_all(pool)
        .await?;

    Ok(locations.iter().any(|loc| haversine_distance_miles(lat, loc.latitude, lon, loc.longitude) <= proximity_miles))
}

/// Organization match: normalized name equality, narrowed by geographic
/// proximity of the candidate's coordinates to any of the organization's
/// existing locations when both the candidate coordinates and the
/// organization's locations are known. An organization with no locations
/// yet (its first observation) matches on name alone.
pub async fn find_organization_match(
    pool: &PgPool,
    normalized_name: &str,
    candidate_lat: Option<f64>,
    candidate_lon: Option<f64>,
    proximity_miles: f64,
) -> Result<Option<Organization>, ReconcilerError> {
    let candidates = organizations_by_name(pool, normalized_name).await?;

    let (lat, lon) = match (candidate_lat, candidate_lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Ok(candidates.into_iter().next()),
    };

    for org in candidates {
        let has_locations = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM locations WHERE organization_id = $1")
            .bind(org.id)
            .fetch_one(pool)
            .await?;

        if has_locations == 0 || organization_has_location_within(pool, org.id, lat, lon, proximity_miles).await? {
            return Ok(Some(org));
        }
    }

    Ok(None)
}

/// Location match: primary key is spatial proximity within
/// `tolerance_meters` combined with a matching postal code when the
/// candidate provides one; secondary key is `external_identifier` equality,
/// used when a source supplies a stable provider-assigned id.
pub async fn find_location_match(
    pool: &PgPool,
    organization_id: Uuid,
    lat: Option<f64>,
    lon: Option<f64>,
    postal_code: Option<&str>,
    external_identifier: Option<&str>,
    tolerance_meters: f64,
) -> Result<Option<Location>, ReconcilerError> {
    if let Some(external_id) = external_identifier {
        let by_external = sqlx::query_as::<_, Location>(
            "SELECT * FROM locations WHERE organization_id = $1 AND external_identifier = $2",
        )
        .bind(organization_id)
        .bind(external_id)
        .fetch_optional(pool)
        .await?;

        if by_external.is_some() {
            return Ok(by_external);
        }
    }

    let (lat, lon) = match (lat, lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Ok(None),
    };

    // `locations` carries no postal code of its own; it's joined in from
    // whichever source observation most recently reported one.
    let candidates: Vec<Location> = match postal_code {
        Some(postal) => {
            sqlx::query_as::<_, Location>(
                r#"
                SELECT DISTINCT l.* FROM locations l
                JOIN locations_source ls ON ls.canonical_id = l.id
                WHERE l.organization_id = $1 AND ls.postal_code = $2
                "#,
            )
            .bind(organization_id)
            .bind(postal)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE organization_id = $1")
                .bind(organization_id)
                .fetch_all(pool)
                .await?
        }
    };

    Ok(candidates
        .into_iter()
        .find(|candidate| haversine_distance_meters(lat, candidate.latitude, lon, candidate.longitude) <= tolerance_meters))
}

/// Service match: `(organization_id, name)` exact equality, per HSDS
/// services rarely carrying a stable external id of their own.
pub async fn find_service_match(pool: &PgPool, organization_id: Uuid, name: &str) -> Result<Option<Service>, ReconcilerError> {
    sqlx::query_as::<_, Service>("SELECT * FROM services WHERE organization_id = $1 AND name = $2")
        .bind(organization_id)
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
}
