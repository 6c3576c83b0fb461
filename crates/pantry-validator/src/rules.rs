use pantry_domain::ValidationNote;
use regex::Regex;

/// Rough CONUS + Alaska + Hawaii bounding boxes. Good enough to flag a
/// geocode that landed in another country; not meant as a precise border.
const US_BOUNDS: [(f64, f64, f64, f64); 3] = [
    (24.396308, 49.384358, -125.0, -66.93457), // continental US
    (51.0, 71.5, -179.0, -129.0),              // Alaska
    (18.5, 22.5, -160.5, -154.5),              // Hawaii
];

/// Builds the case-insensitive word-boundary alternation used to flag
/// obvious test/placeholder data in free-text fields, from the configured
/// list of bare words (e.g. `anytown`, `unknown`, `sample`).
pub fn compile_word_pattern(words: &[String]) -> Result<Regex, regex::Error> {
    let escaped: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
    Regex::new(&format!(r"(?i)\b({})\b", escaped.join("|")))
}

/// Builds the alternation of the configured placeholder-address regex
/// fragments (each already anchored/quantified by whoever wrote the
/// config entry) into one combined pattern.
pub fn compile_alternation_pattern(fragments: &[String]) -> Result<Regex, regex::Error> {
    let joined = fragments.iter().map(|f| format!("(?:{f})")).collect::<Vec<_>>().join("|");
    Regex::new(&format!("(?i){joined}"))
}

/// Hard reject: a location with no coordinates (even after enrichment) or
/// with coordinates of exactly (0, 0) cannot be canonicalized regardless of
/// everything else.
pub fn hard_reject(lat: Option<f64>, lon: Option<f64>) -> Option<ValidationNote> {
    match (lat, lon) {
        (Some(lat), Some(lon)) if lat == 0.0 && lon == 0.0 => {
            Some(ValidationNote::new("zero_coordinates", -100, "coordinates are exactly (0, 0)"))
        }
        (Some(_), Some(_)) => None,
        _ => Some(ValidationNote::new("missing_coordinates", -100, "location has no coordinates after enrichment")),
    }
}

/// Distance in degrees from `(lat, lon)` to the nearest edge of the nearest
/// US bounding box, 0 if inside one of them.
fn degrees_outside_us_bounds(lat: f64, lon: f64) -> f64 {
    US_BOUNDS
        .iter()
        .map(|&(lat_min, lat_max, lon_min, lon_max)| {
            let lat_gap = (lat_min - lat).max(lat - lat_max).max(0.0);
            let lon_gap = (lon_min - lon).max(lon - lon_max).max(0.0);
            lat_gap.max(lon_gap)
        })
        .fold(f64::INFINITY, f64::min)
}

/// Scales the out-of-bounds penalty with distance from the US bounding
/// boxes so a coordinate a fraction of a degree outside isn't penalized the
/// same as one on another continent: degree 0 (on the boundary) is -15,
/// the penalty reaches -70 once the coordinate is 30+ degrees out.
pub fn us_bounds_check(lat: f64, lon: f64) -> ValidationNote {
    let gap = degrees_outside_us_bounds(lat, lon);
    if gap <= 0.0 {
        ValidationNote::new("us_bounds", 10, "coordinates fall within US bounds")
    } else {
        const MIN_PENALTY: f64 = 15.0;
        const MAX_PENALTY: f64 = 70.0;
        const MAX_GAP_DEGREES: f64 = 30.0;
        let penalty = MIN_PENALTY + (MAX_PENALTY - MIN_PENALTY) * (gap / MAX_GAP_DEGREES).min(1.0);
        ValidationNote::new(
            "us_bounds",
            -(penalty.round() as i16),
            format!("coordinates fall outside expected US bounds ({gap:.1} degrees out)"),
        )
    }
}

/// Very rough per-state longitude bands, used only to catch a grossly wrong
/// geocode (e.g. a Minnesota address resolving to Florida), not to validate
/// precise state borders.
fn state_longitude_band(state: &str) -> Option<(f64, f64)> {
    match state.to_uppercase().as_str() {
        "MN" | "WI" | "IA" | "ND" | "SD" => Some((-104.5, -89.0)),
        "CA" | "OR" | "WA" => Some((-125.0, -114.0)),
        "NY" | "NJ" | "CT" | "MA" => Some((-80.0, -71.0)),
        "TX" => Some((-107.0, -93.0)),
        "FL" => Some((-87.6, -80.0)),
        _ => None,
    }
}

pub fn state_coordinate_coherence(state: Option<&str>, lon: f64) -> Option<ValidationNote> {
    let state = state?;
    let (lon_min, lon_max) = state_longitude_band(state)?;
    if lon >= lon_min && lon <= lon_max {
        Some(ValidationNote::new("state_coherence", 5, format!("longitude matches expected band for {state}")))
    } else {
        Some(ValidationNote::new("state_coherence", -10, format!("longitude does not match expected band for {state}")))
    }
}

pub fn test_data_check(fields: &[&str], pattern: &Regex) -> Option<ValidationNote> {
    let matched = fields.iter().any(|f| pattern.is_match(f));
    matched.then(|| ValidationNote::new("test_data_pattern", -30, "name or description matches a test-data pattern"))
}

pub fn placeholder_address_check(address: Option<&str>, pattern: &Regex) -> Option<ValidationNote> {
    let address = address?;
    pattern
        .is_match(address.trim())
        .then(|| ValidationNote::new("placeholder_address", -20, "address matches a known placeholder pattern"))
}

pub fn geocoding_source_quality(source: Option<&str>) -> ValidationNote {
    match source {
        Some("arcgis") => ValidationNote::new("geocoding_source", 5, "arcgis is a high-confidence provider"),
        Some("census") => ValidationNote::new("geocoding_source", 3, "census is a moderate-confidence provider"),
        Some("nominatim") => ValidationNote::new("geocoding_source", 0, "nominatim confidence is neutral"),
        Some(other) => ValidationNote::new("geocoding_source", 0, format!("unrecognized provider {other}")),
        None => ValidationNote::new("geocoding_source", -10, "no geocoding source recorded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_coordinates_hard_reject() {
        let note = hard_reject(Some(0.0), Some(0.0)).unwrap();
        assert_eq!(note.rule, "zero_coordinates");
    }

    #[test]
    fn missing_coordinates_hard_reject() {
        let note = hard_reject(None, None).unwrap();
        assert_eq!(note.rule, "missing_coordinates");
    }

    #[test]
    fn minneapolis_is_within_us_bounds() {
        let note = us_bounds_check(44.9778, -93.2650);
        assert!(note.delta > 0);
    }

    #[test]
    fn london_is_outside_us_bounds_and_takes_the_max_penalty() {
        let note = us_bounds_check(51.5074, -0.1278);
        assert_eq!(note.delta, -70);
    }

    #[test]
    fn just_north_of_the_border_takes_a_small_penalty() {
        let note = us_bounds_check(50.0, -93.0);
        assert!(note.delta < 0 && note.delta > -70, "a near-miss shouldn't take the full penalty");
    }

    #[test]
    fn minnesota_longitude_matches_its_band() {
        let note = state_coordinate_coherence(Some("MN"), -93.27).unwrap();
        assert!(note.delta > 0);
    }

    #[test]
    fn minnesota_state_with_florida_longitude_mismatches() {
        let note = state_coordinate_coherence(Some("MN"), -80.19).unwrap();
        assert!(note.delta < 0);
    }

    fn default_words() -> Vec<String> {
        vec!["anytown", "unknown", "sample", "test", "example", "lorem ipsum", "asdf", "foo ?bar", "placeholder"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn default_placeholder_fragments() -> Vec<String> {
        vec![r"^n/?a$", r"^tbd$", r"^unknown$", r"^123 main st\.?$"].into_iter().map(String::from).collect()
    }

    #[test]
    fn test_data_pattern_flags_example_org() {
        let pattern = compile_word_pattern(&default_words()).unwrap();
        let note = test_data_check(&["Example Food Shelf", ""], &pattern);
        assert!(note.is_some());
    }

    #[test]
    fn test_data_pattern_flags_anytown_per_spec_scenario() {
        let pattern = compile_word_pattern(&default_words()).unwrap();
        let note = test_data_check(&["Anytown Food Pantry", ""], &pattern);
        assert!(note.is_some());
    }

    #[test]
    fn placeholder_address_flags_tbd() {
        let pattern = compile_alternation_pattern(&default_placeholder_fragments()).unwrap();
        let note = placeholder_address_check(Some("TBD"), &pattern);
        assert!(note.is_some());
    }

    #[test]
    fn real_address_does_not_match_placeholder_pattern() {
        let pattern = compile_alternation_pattern(&default_placeholder_fragments()).unwrap();
        assert!(placeholder_address_check(Some("456 Oak Avenue"), &pattern).is_none());
    }
}
