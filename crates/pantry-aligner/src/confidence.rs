use pantry_domain::HsdsPayload;

/// Weighted confidence score for an aligned payload: the LLM's own
/// self-reported confidence (when it provides one), how many of the
/// extraction's optional-but-expected fields are actually populated, and
/// how many structural coherence issues `coherence::check` found.
pub fn score(payload: &HsdsPayload, llm_confidence: Option<f32>, coherence_issue_count: usize) -> f32 {
    let llm_component = llm_confidence.unwrap_or(0.6);
    let completeness = completeness_fraction(payload);
    let coherence_component = (1.0 - coherence_issue_count as f32 * 0.15).max(0.0);

    let weighted = llm_component * 0.4 + completeness * 0.3 + coherence_component * 0.3;
    weighted.clamp(0.0, 1.0)
}

/// Fraction of 6 expected-but-optional fields populated: org description,
/// org url, any location with coordinates, any location with an address,
/// any service with a description, any service with a status.
fn completeness_fraction(payload: &HsdsPayload) -> f32 {
    let mut filled = 0.0_f32;
    const TOTAL: f32 = 6.0;

    if let Some(org) = &payload.organization {
        if org.description.is_some() {
            filled += 1.0;
        }
        if org.url.is_some() {
            filled += 1.0;
        }
    }

    if payload.locations.iter().any(|l| l.latitude.is_some() && l.longitude.is_some()) {
        filled += 1.0;
    }
    if payload.locations.iter().any(|l| l.address.is_some()) {
        filled += 1.0;
    }
    if payload.services.iter().any(|s| s.description.is_some()) {
        filled += 1.0;
    }
    if payload.services.iter().any(|s| s.status.is_some()) {
        filled += 1.0;
    }

    filled / TOTAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantry_domain::OrganizationDraft;

    #[test]
    fn empty_payload_scores_low() {
        let payload = HsdsPayload::default();
        let result = score(&payload, None, 1);
        assert!(result < 0.5, "expected a low score for an empty payload, got {result}");
    }

    #[test]
    fn complete_payload_with_no_issues_and_high_llm_confidence_scores_high() {
        let payload = HsdsPayload {
            organization: Some(OrganizationDraft {
                name: "Helping Hands".into(),
                description: Some("A food shelf".into()),
                url: Some("https://example.org".into()),
                ..Default::default()
            }),
            locations: vec![pantry_domain::LocationDraft {
                latitude: Some(44.96),
                longitude: Some(-93.27),
                address: Some("123 Main St".into()),
                ..Default::default()
            }],
            services: vec![pantry_domain::ServiceDraft {
                name: "Food Shelf".into(),
                description: Some("Weekly groceries".into()),
                status: Some(pantry_domain::ServiceStatus::Active),
                ..Default::default()
            }],
        };
        let result = score(&payload, Some(0.95), 0);
        assert!(result > 0.85, "expected a high score, got {result}");
    }

    #[test]
    fn coherence_issues_reduce_score() {
        let payload = HsdsPayload::default();
        let clean = score(&payload, Some(0.9), 0);
        let with_issues = score(&payload, Some(0.9), 3);
        assert!(with_issues < clean);
    }
}
