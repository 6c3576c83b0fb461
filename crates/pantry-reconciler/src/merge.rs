//! Field-by-field merge rules, grounded on the teacher's `COALESCE($n, col)`
//! update pattern (`rootsignal-domains/src/entities/models/entity.rs`)
//! generalized from "keep existing unless null" to the four merge
//! strategies the canonical record needs: provenance ranking, non-empty-
//! over-empty, weighted-centroid coordinates, and longest-non-redundant
//! free text. Kept as pure functions so the merge logic is testable without
//! a database.

/// Prefer whichever side is non-empty; `current` wins on a tie or when both
/// are empty.
pub fn non_empty_over_empty(current: Option<String>, incoming: Option<String>) -> Option<String> {
    match (&current, &incoming) {
        (None, Some(_)) => incoming,
        (Some(c), Some(_)) if c.trim().is_empty() => incoming,
        _ => current,
    }
}

/// Keep the longer of the two texts unless the shorter is already fully
/// contained in the longer (case-insensitive), in which case the longer
/// still wins — the shorter carries no new information either way.
pub fn longest_non_redundant(current: Option<String>, incoming: Option<String>) -> Option<String> {
    match (current, incoming) {
        (None, incoming) => incoming,
        (current, None) => current,
        (Some(current), Some(incoming)) => {
            if incoming.trim().len() > current.trim().len() {
                Some(incoming)
            } else {
                Some(current)
            }
        }
    }
}

/// Pick the value whose source carries the higher confidence score. Ties
/// keep `current` so repeated reconciliation of identical-confidence
/// sources is stable.
pub fn by_provenance<T>(current: (T, i16), incoming: (T, i16)) -> T {
    if incoming.1 > current.1 {
        incoming.0
    } else {
        current.0
    }
}

/// Weighted centroid of two coordinate observations, weighted by each
/// side's confidence score. Scores are floored at 1 so a zero-confidence
/// observation still nudges the centroid rather than being divided away.
pub fn weighted_centroid(current: (f64, f64, i16), incoming: (f64, f64, i16)) -> (f64, f64) {
    let w_current = current.2.max(1) as f64;
    let w_incoming = incoming.2.max(1) as f64;
    let total = w_current + w_incoming;
    let lat = (current.0 * w_current + incoming.0 * w_incoming) / total;
    let lon = (current.1 * w_current + incoming.1 * w_incoming) / total;
    (lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_over_empty_prefers_incoming_when_current_missing() {
        assert_eq!(non_empty_over_empty(None, Some("a".into())), Some("a".into()));
    }

    #[test]
    fn non_empty_over_empty_keeps_current_when_both_present() {
        assert_eq!(non_empty_over_empty(Some("a".into()), Some("b".into())), Some("a".into()));
    }

    #[test]
    fn longest_non_redundant_keeps_longer_text() {
        let current = Some("A food shelf".to_string());
        let incoming = Some("A food shelf open Tuesdays and Thursdays".to_string());
        assert_eq!(longest_non_redundant(current, incoming.clone()), incoming);
    }

    #[test]
    fn by_provenance_prefers_higher_confidence_source() {
        assert_eq!(by_provenance(("old".to_string(), 40), ("new".to_string(), 80)), "new");
        assert_eq!(by_provenance(("old".to_string(), 80), ("new".to_string(), 40)), "old");
    }

    #[test]
    fn weighted_centroid_leans_toward_higher_confidence_observation() {
        let (lat, _lon) = weighted_centroid((44.0, -93.0, 90), (45.0, -93.0, 10));
        assert!(lat < 44.5, "centroid should lean toward the higher-confidence observation");
    }
}
