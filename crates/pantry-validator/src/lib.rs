//! Runs after alignment, before canonicalization: fills in missing
//! coordinates/addresses via geocoding, then scores each entity with a
//! weighted-sum of named rules, grounded on the teacher's
//! `rootsignal-scout/src/quality.rs` scoring shape generalized to HSDS
//! coordinate/address rules.

mod rules;

use std::sync::Arc;

use pantry_domain::{HsdsPayload, LocationDraft, OrganizationDraft, ServiceDraft, ValidationAttrs, ValidationStatus};
use pantry_geocoding::GeocodingProviderSet;
use regex::Regex;
use tracing::warn;

const BASE_SCORE_LOCATION: i16 = 50;
const BASE_SCORE_ORGANIZATION: i16 = 70;
const BASE_SCORE_SERVICE: i16 = 70;

pub struct ValidatorEnricher {
    geocoding: Arc<GeocodingProviderSet>,
    verified_threshold: i16,
    rejection_threshold: i16,
    test_data_pattern: Regex,
    placeholder_address_pattern: Regex,
}

impl ValidatorEnricher {
    /// `test_patterns` and `placeholder_patterns` come from `Config`
    /// (`validation_test_patterns`/`validation_placeholder_patterns`); there
    /// is no hardcoded fallback list, so an empty slice here means those
    /// checks never fire rather than silently using stale defaults.
    pub fn new(
        geocoding: Arc<GeocodingProviderSet>,
        verified_threshold: i16,
        rejection_threshold: i16,
        test_patterns: &[String],
        placeholder_patterns: &[String],
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            geocoding,
            verified_threshold,
            rejection_threshold,
            test_data_pattern: rules::compile_word_pattern(test_patterns)?,
            placeholder_address_pattern: rules::compile_alternation_pattern(placeholder_patterns)?,
        })
    }

    fn status_for(&self, score: i16, hard_rejected: bool) -> ValidationStatus {
        if hard_rejected || score < self.rejection_threshold {
            ValidationStatus::Rejected
        } else if score >= self.verified_threshold {
            ValidationStatus::Verified
        } else {
            ValidationStatus::NeedsReview
        }
    }

    /// Enrich and score every entity in `payload` in place. Geocoding
    /// failures are tolerated: a location that cannot be enriched simply
    /// fails the hard-reject coordinate check on its own.
    pub async fn run(&self, payload: &mut HsdsPayload) {
        if let Some(org) = &mut payload.organization {
            self.validate_organization(org);
        }

        for location in &mut payload.locations {
            self.enrich_location(location).await;
            self.validate_location(location);
        }

        for service in &mut payload.services {
            self.validate_service(service);
        }
    }

    async fn enrich_location(&self, location: &mut LocationDraft) {
        let has_coords = location.latitude.is_some() && location.longitude.is_some();
        let has_address = location.address.is_some();

        if !has_coords {
            if let Some(address) = Self::format_address(location) {
                match self.geocoding.geocode(&address).await {
                    Ok(result) => {
                        location.latitude = Some(result.lat);
                        location.longitude = Some(result.lon);
                        location.validation.geocoding_source = Some(result.source);
                        if location.address.is_none() {
                            location.address = result.address;
                        }
                    }
                    Err(err) => warn!(error = %err, "geocoding failed, location will likely hard-reject"),
                }
            }
        } else if !has_address {
            if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
                match self.geocoding.reverse(lat, lon).await {
                    Ok(result) => {
                        location.address = result.address;
                        location.validation.geocoding_source = Some(result.source);
                    }
                    Err(err) => warn!(error = %err, "reverse geocoding failed, address remains unset"),
                }
            }
        }
    }

    fn format_address(location: &LocationDraft) -> Option<String> {
        let parts: Vec<&str> = [location.address.as_deref(), location.city.as_deref(), location.state.as_deref(), location.postal_code.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    fn validate_location(&self, location: &mut LocationDraft) {
        let mut attrs = ValidationAttrs::default();
        let mut score = BASE_SCORE_LOCATION;

        let reject_note = rules::hard_reject(location.latitude, location.longitude);
        let hard_rejected = reject_note.is_some();
        if let Some(note) = reject_note {
            score += note.delta;
            attrs.validation_notes.push(note);
        }

        if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
            if !hard_rejected {
                let bounds_note = rules::us_bounds_check(lat, lon);
                score += bounds_note.delta;
                attrs.validation_notes.push(bounds_note);

                if let Some(note) = rules::state_coordinate_coherence(location.state.as_deref(), lon) {
                    score += note.delta;
                    attrs.validation_notes.push(note);
                }
            }
        }

        let fields: Vec<&str> = [location.name.as_deref(), location.description.as_deref()].into_iter().flatten().collect();
        if let Some(note) = rules::test_data_check(&fields, &self.test_data_pattern) {
            score += note.delta;
            attrs.validation_notes.push(note);
        }

        if let Some(note) = rules::placeholder_address_check(location.address.as_deref(), &self.placeholder_address_pattern) {
            score += note.delta;
            attrs.validation_notes.push(note);
        }

        let geocoding_note = rules::geocoding_source_quality(location.validation.geocoding_source.as_deref());
        score += geocoding_note.delta;
        attrs.validation_notes.push(geocoding_note);

        attrs.confidence_score = score.clamp(0, 100);
        attrs.validation_status = self.status_for(attrs.confidence_score, hard_rejected);
        attrs.geocoding_source = location.validation.geocoding_source.clone();
        location.validation = attrs;
    }

    fn validate_organization(&self, org: &mut OrganizationDraft) {
        let mut attrs = ValidationAttrs::default();
        let mut score = BASE_SCORE_ORGANIZATION;

        let fields: Vec<&str> = [Some(org.name.as_str()), org.description.as_deref()].into_iter().flatten().collect();
        if let Some(note) = rules::test_data_check(&fields, &self.test_data_pattern) {
            score += note.delta;
            attrs.validation_notes.push(note);
        }

        attrs.confidence_score = score.clamp(0, 100);
        attrs.validation_status = self.status_for(attrs.confidence_score, false);
        org.validation = attrs;
    }

    fn validate_service(&self, service: &mut ServiceDraft) {
        let mut attrs = ValidationAttrs::default();
        let mut score = BASE_SCORE_SERVICE;

        let fields: Vec<&str> = [Some(service.name.as_str()), service.description.as_deref()].into_iter().flatten().collect();
        if let Some(note) = rules::test_data_check(&fields, &self.test_data_pattern) {
            score += note.delta;
            attrs.validation_notes.push(note);
        }

        attrs.confidence_score = score.clamp(0, 100);
        attrs.validation_status = self.status_for(attrs.confidence_score, false);
        service.validation = attrs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pantry_geocoding::{GeocodeResult, GeocodingError, GeocodingProvider};
    use std::time::Duration;

    struct FixedProvider;

    #[async_trait]
    impl GeocodingProvider for FixedProvider {
        fn name(&self) -> &str {
            "arcgis"
        }

        async fn geocode(&self, _address: &str) -> Result<GeocodeResult, GeocodingError> {
            Ok(GeocodeResult { lat: 44.9778, lon: -93.2650, source: "arcgis".into(), address: Some("123 Hennepin Ave, Minneapolis, MN".into()) })
        }

        async fn reverse(&self, lat: f64, lon: f64) -> Result<GeocodeResult, GeocodingError> {
            Ok(GeocodeResult { lat, lon, source: "arcgis".into(), address: Some("123 Hennepin Ave, Minneapolis, MN".into()) })
        }
    }

    fn validator() -> ValidatorEnricher {
        let set = GeocodingProviderSet::new(
            vec![std::sync::Arc::new(FixedProvider) as std::sync::Arc<dyn GeocodingProvider>],
            Duration::from_secs(60),
            5,
            Duration::from_secs(60),
            1,
            Duration::from_millis(1),
        );
        let test_patterns = vec!["anytown".to_string(), "unknown".to_string(), "sample".to_string(), "test".to_string(), "example".to_string()];
        let placeholder_patterns = vec![r"^n/?a$".to_string(), r"^tbd$".to_string(), r"^unknown$".to_string()];
        ValidatorEnricher::new(Arc::new(set), 70, 10, &test_patterns, &placeholder_patterns).unwrap()
    }

    #[tokio::test]
    async fn location_missing_coordinates_is_enriched_and_verified() {
        let validator = validator();
        let mut location = LocationDraft { address: Some("123 Hennepin Ave".into()), state: Some("MN".into()), ..Default::default() };

        validator.enrich_location(&mut location).await;
        validator.validate_location(&mut location);

        assert_eq!(location.latitude, Some(44.9778));
        assert_eq!(location.validation.validation_status, ValidationStatus::Verified);
    }

    #[tokio::test]
    async fn location_with_zero_coordinates_is_rejected_regardless_of_other_signals() {
        let validator = validator();
        let mut location = LocationDraft { latitude: Some(0.0), longitude: Some(0.0), state: Some("MN".into()), ..Default::default() };

        validator.validate_location(&mut location);

        assert_eq!(location.validation.validation_status, ValidationStatus::Rejected);
    }

    #[tokio::test]
    async fn test_data_name_drags_organization_into_needs_review() {
        let validator = validator();
        let mut org = OrganizationDraft { name: "Example Test Org".into(), ..Default::default() };

        validator.validate_organization(&mut org);

        assert_ne!(org.validation.validation_status, ValidationStatus::Verified);
    }

    #[tokio::test]
    async fn anytown_organization_name_is_flagged_as_test_data() {
        let validator = validator();
        let mut org = OrganizationDraft { name: "Anytown Food Pantry".into(), ..Default::default() };

        validator.validate_organization(&mut org);

        assert_ne!(org.validation.validation_status, ValidationStatus::Verified);
    }
}
