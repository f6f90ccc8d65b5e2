use crate::state::staleness::is_stale;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A data holder brand's listing endpoint, keyed in the registry by brand id
///
/// On-disk keys follow the historical registry files; the aliases accept the
/// newer names as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEndpoint {
    /// Brand name as published in the directory
    #[serde(rename = "brandName", alias = "providerName")]
    pub provider_name: String,

    /// Public base URI as published in the directory
    #[serde(rename = "baseUri")]
    pub base_uri: String,

    /// Manual correction taking precedence over `provider_name`
    #[serde(rename = "brandNameOverride", alias = "nameOverride", default)]
    pub name_override: Option<String>,

    /// Manual correction taking precedence over `base_uri`
    #[serde(rename = "baseUriOverride", alias = "uriOverride", default)]
    pub uri_override: Option<String>,

    /// Missing only for entries added by hand and not yet back-filled
    #[serde(rename = "firstSeen", default)]
    pub first_seen: Option<DateTime<Utc>>,

    #[serde(rename = "lastSeen", default)]
    pub last_seen: Option<DateTime<Utc>>,

    /// Time of the last HTTP 200 from this brand's listing endpoint
    #[serde(rename = "last200Response", alias = "lastSuccessAt", default)]
    pub last_success_at: Option<DateTime<Utc>>,

    /// Never enqueue requests for this brand
    #[serde(default)]
    pub skip: bool,
}

impl SummaryEndpoint {
    /// Creates an endpoint first observed at `seen_at`
    pub fn new(
        provider_name: impl Into<String>,
        base_uri: impl Into<String>,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            base_uri: base_uri.into(),
            name_override: None,
            uri_override: None,
            first_seen: Some(seen_at),
            last_seen: Some(seen_at),
            last_success_at: None,
            skip: false,
        }
    }

    /// Brand name after applying the manual override
    pub fn effective_name(&self) -> &str {
        self.name_override.as_deref().unwrap_or(&self.provider_name)
    }

    /// Base URI after applying the manual override
    pub fn effective_base_uri(&self) -> &str {
        self.uri_override.as_deref().unwrap_or(&self.base_uri)
    }

    /// Refreshes the endpoint from a directory sighting
    pub fn observe(&mut self, provider_name: String, base_uri: String, seen_at: DateTime<Utc>) {
        self.provider_name = provider_name;
        self.base_uri = base_uri;
        self.mark_seen(seen_at);
    }

    /// Back-fills missing sighting timestamps on hand-added entries
    ///
    /// Returns true when anything was filled in.
    pub fn backfill(&mut self, seen_at: DateTime<Utc>) -> bool {
        if self.first_seen.is_some() && self.last_seen.is_some() {
            return false;
        }
        self.first_seen.get_or_insert(seen_at);
        self.last_seen.get_or_insert(seen_at);
        true
    }

    /// Records an HTTP 200 from the listing endpoint
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_success_at = Some(self.last_success_at.map_or(at, |prev| prev.max(at)));
        self.mark_seen(at);
    }

    /// Whether a failed attempt at `now` makes this endpoint eligible for pruning
    ///
    /// Entries that were never back-filled have no reference time and are kept.
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let reference = self.last_success_at.or(self.first_seen);
        match (reference, self.last_seen) {
            (Some(reference), Some(last_seen)) => is_stale(reference, last_seen, now, window),
            _ => false,
        }
    }

    fn mark_seen(&mut self, at: DateTime<Utc>) {
        self.first_seen = Some(self.first_seen.map_or(at, |prev| prev.min(at)));
        self.last_seen = Some(self.last_seen.map_or(at, |prev| prev.max(at)));
    }
}
