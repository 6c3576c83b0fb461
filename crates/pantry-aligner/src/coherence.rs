use pantry_domain::HsdsPayload;

/// Structural checks on an aligned payload that don't require a database:
/// internal index references, degenerate coordinates, and truly-empty
/// required strings an LLM sometimes emits instead of a leaving the field
/// null. Each violation both disqualifies a retry target and becomes
/// corrective context for the next prompt attempt.
pub fn check(payload: &HsdsPayload) -> Vec<String> {
    let mut issues = Vec::new();

    match &payload.organization {
        None => issues.push("organization is missing".to_string()),
        Some(org) if org.name.trim().is_empty() => issues.push("organization.name is empty".to_string()),
        Some(_) => {}
    }

    for (i, location) in payload.locations.iter().enumerate() {
        if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                issues.push(format!("locations[{i}] coordinates ({lat}, {lon}) are out of range"));
            }
            if lat == 0.0 && lon == 0.0 {
                issues.push(format!("locations[{i}] coordinates are (0, 0), almost certainly a placeholder"));
            }
        }
    }

    for (i, service) in payload.services.iter().enumerate() {
        if service.name.trim().is_empty() {
            issues.push(format!("services[{i}].name is empty"));
        }
        if let Some(idx) = service.location_index {
            if idx >= payload.locations.len() {
                issues.push(format!("services[{i}].location_index {idx} does not refer to a location in the payload"));
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantry_domain::{LocationDraft, OrganizationDraft, ServiceDraft};

    #[test]
    fn missing_organization_is_flagged() {
        let payload = HsdsPayload::default();
        let issues = check(&payload);
        assert!(issues.iter().any(|i| i.contains("organization is missing")));
    }

    #[test]
    fn dangling_location_index_is_flagged() {
        let payload = HsdsPayload {
            organization: Some(OrganizationDraft { name: "Helping Hands".into(), ..Default::default() }),
            locations: vec![],
            services: vec![ServiceDraft { name: "Food Shelf".into(), location_index: Some(0), ..Default::default() }],
        };
        let issues = check(&payload);
        assert!(issues.iter().any(|i| i.contains("location_index")));
    }

    #[test]
    fn zero_zero_coordinates_are_flagged_as_placeholder() {
        let payload = HsdsPayload {
            organization: Some(OrganizationDraft { name: "Org".into(), ..Default::default() }),
            locations: vec![LocationDraft { latitude: Some(0.0), longitude: Some(0.0), ..Default::default() }],
            services: vec![],
        };
        let issues = check(&payload);
        assert!(issues.iter().any(|i| i.contains("placeholder")));
    }

    #[test]
    fn well_formed_payload_has_no_issues() {
        let payload = HsdsPayload {
            organization: Some(OrganizationDraft { name: "Helping Hands".into(), ..Default::default() }),
            locations: vec![LocationDraft { latitude: Some(44.96), longitude: Some(-93.27), ..Default::default() }],
            services: vec![ServiceDraft { name: "Food Shelf".into(), location_index: Some(0), ..Default::default() }],
        };
        assert!(check(&payload).is_empty());
    }
}
