use crate::state::staleness::is_stale;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An item listed by a brand, as extracted from one listing or detail payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemObservation {
    pub item_id: String,
    pub sub_brand: Option<String>,
    pub category: Option<String>,
}

/// A per-item detail endpoint, keyed in the registry by (brand id, item id)
///
/// `category` carries the category-specific classification tag
/// (`productCategory` for banking, `fuelType` for energy). The registry
/// writes it back under that key, so the field name here is neutral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailEndpoint {
    #[serde(rename = "subBrand", default)]
    pub sub_brand: Option<String>,

    #[serde(alias = "productCategory", alias = "fuelType", default)]
    pub category: Option<String>,

    #[serde(rename = "firstSeen")]
    pub first_seen: DateTime<Utc>,

    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,

    #[serde(rename = "last200Response", alias = "lastSuccessAt", default)]
    pub last_success_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub skip: bool,
}

impl DetailEndpoint {
    /// Creates an entry from its first successful observation
    pub fn from_observation(observation: &ItemObservation, observed_at: DateTime<Utc>) -> Self {
        Self {
            sub_brand: observation.sub_brand.clone(),
            category: observation.category.clone(),
            first_seen: observed_at,
            last_seen: observed_at,
            last_success_at: Some(observed_at),
            skip: false,
        }
    }

    /// Folds a later observation into the entry
    ///
    /// Classification fields take the observed values; timestamps only move
    /// forward so late completions cannot roll them back.
    pub fn observe(&mut self, observation: &ItemObservation, observed_at: DateTime<Utc>) {
        self.sub_brand = observation.sub_brand.clone();
        self.category = observation.category.clone();
        self.record_success(observed_at);
    }

    /// Records an HTTP 200 naming this item
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_success_at = Some(self.last_success_at.map_or(at, |prev| prev.max(at)));
        self.first_seen = self.first_seen.min(at);
        self.last_seen = self.last_seen.max(at);
    }

    /// Whether a failed attempt at `now` makes this entry eligible for pruning
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let reference = self.last_success_at.unwrap_or(self.first_seen);
        is_stale(reference, self.last_seen, now, window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn observation(category: &str) -> ItemObservation {
        ItemObservation {
            item_id: "A".to_string(),
            sub_brand: Some("Sub".to_string()),
            category: Some(category.to_string()),
        }
    }

    #[test]
    fn test_first_observation_sets_all_timestamps() {
        let entry = DetailEndpoint::from_observation(&observation("MORTGAGES"), now());
        assert_eq!(entry.first_seen, now());
        assert_eq!(entry.last_seen, now());
        assert_eq!(entry.last_success_at, Some(now()));
        assert_eq!(entry.category.as_deref(), Some("MORTGAGES"));
    }

    #[test]
    fn test_later_observation_wins_for_classification() {
        let mut entry = DetailEndpoint::from_observation(&observation("MORTGAGES"), now());
        let later = now() + Duration::hours(1);
        entry.observe(&observation("PERS_LOANS"), later);

        assert_eq!(entry.category.as_deref(), Some("PERS_LOANS"));
        assert_eq!(entry.first_seen, now());
        assert_eq!(entry.last_seen, later);
        assert_eq!(entry.last_success_at, Some(later));
    }

    #[test]
    fn test_staleness_requires_both_conditions() {
        let old = now() - Duration::days(91);
        let mut entry = DetailEndpoint::from_observation(&observation("X"), old);
        assert!(entry.is_stale(now(), Duration::days(90)));

        entry.last_seen = now();
        assert!(!entry.is_stale(now(), Duration::days(90)));
    }

    #[test]
    fn test_deserialize_either_classification_key() {
        let banking = r#"{"subBrand": null, "productCategory": "MORTGAGES",
            "firstSeen": "2024-01-01T00:00:00+00:00", "lastSeen": "2024-01-02T00:00:00+00:00"}"#;
        let energy = r#"{"subBrand": "Green", "fuelType": "ELECTRICITY",
            "firstSeen": "2024-01-01T00:00:00Z", "lastSeen": "2024-01-02T00:00:00Z",
            "last200Response": "2024-01-02T00:00:00Z", "skip": true}"#;

        let banking: DetailEndpoint = serde_json::from_str(banking).unwrap();
        let energy: DetailEndpoint = serde_json::from_str(energy).unwrap();

        assert_eq!(banking.category.as_deref(), Some("MORTGAGES"));
        assert!(banking.last_success_at.is_none());
        assert_eq!(energy.category.as_deref(), Some("ELECTRICITY"));
        assert!(energy.skip);
    }
}
