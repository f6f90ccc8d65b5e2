//! Run and registry statistics
//!
//! This module provides counters collected while a category runs, and a
//! point-in-time summary of a loaded registry for the `--stats` mode.

use crate::storage::Registry;
use chrono::{DateTime, Duration, Utc};
use std::ops::AddAssign;

/// Counters for one stage (or, summed, one category run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStatistics {
    /// Logical requests issued (retries not counted)
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub new_providers: u64,
    pub new_items: u64,
    pub pruned_providers: u64,
    pub pruned_items: u64,
}

impl RunStatistics {
    /// Counts one completed request
    pub fn record_request(&mut self, success: bool) {
        self.requests += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    /// Percentage of requests that returned HTTP 200
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        (self.successes as f64 / self.requests as f64) * 100.0
    }
}

impl AddAssign for RunStatistics {
    fn add_assign(&mut self, other: Self) {
        self.requests += other.requests;
        self.successes += other.successes;
        self.failures += other.failures;
        self.new_providers += other.new_providers;
        self.new_items += other.new_items;
        self.pruned_providers += other.pruned_providers;
        self.pruned_items += other.pruned_items;
    }
}

/// Logs a one-line summary of a stage's counters
pub fn log_run_statistics(label: &str, stats: &RunStatistics) {
    tracing::info!(
        "{}: {} requests, {} ok, {} failed ({:.1}%), +{} brands, +{} items, -{} brands, -{} items",
        label,
        stats.requests,
        stats.successes,
        stats.failures,
        stats.success_rate(),
        stats.new_providers,
        stats.new_items,
        stats.pruned_providers,
        stats.pruned_items
    );
}

/// Point-in-time summary of a registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStatistics {
    pub category: String,
    pub providers: usize,
    pub skipped_providers: usize,
    /// Brands that have never answered their listing endpoint with 200
    pub never_successful_providers: usize,
    /// Brands the next failed attempt would prune
    pub stale_providers: usize,
    pub items: usize,
    pub skipped_items: usize,
    pub stale_items: usize,
}

impl RegistryStatistics {
    /// Summarizes `registry` as of `now`
    ///
    /// # Arguments
    ///
    /// * `registry` - A loaded registry
    /// * `now` - Reference time for prune eligibility
    /// * `window` - Staleness window
    pub fn collect(registry: &Registry, now: DateTime<Utc>, window: Duration) -> Self {
        let summaries = registry.summaries().values();
        let items = || registry.details().values().flat_map(|items| items.values());

        let mut stats = Self {
            category: registry.category().to_string(),
            providers: registry.summaries().len(),
            items: registry.detail_count(),
            ..Self::default()
        };

        for summary in summaries {
            stats.skipped_providers += usize::from(summary.skip);
            stats.never_successful_providers += usize::from(summary.last_success_at.is_none());
            stats.stale_providers += usize::from(summary.is_stale(now, window));
        }
        stats.skipped_items = items().filter(|d| d.skip).count();
        stats.stale_items = items().filter(|d| d.is_stale(now, window)).count();

        stats
    }
}

/// Prints registry statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_registry_statistics(stats: &RegistryStatistics) {
    println!("=== Registry Statistics ({}) ===\n", stats.category);

    println!("Brands:");
    println!("  Total: {}", stats.providers);
    println!("  Skipped: {}", stats.skipped_providers);
    println!("  Never successful: {}", stats.never_successful_providers);
    println!("  Eligible for pruning: {}", stats.stale_providers);
    println!();

    println!("Items:");
    println!("  Total: {}", stats.items);
    println!("  Skipped: {}", stats.skipped_items);
    println!("  Eligible for pruning: {}", stats.stale_items);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_categories;
    use crate::state::{ItemObservation, SummaryEndpoint};
    use chrono::TimeZone;
    use std::path::Path;

    #[test]
    fn test_record_and_sum() {
        let mut listing = RunStatistics::default();
        listing.record_request(true);
        listing.record_request(false);
        listing.new_items = 3;

        let mut detail = RunStatistics::default();
        detail.record_request(true);
        detail.pruned_items = 1;

        let mut total = RunStatistics::default();
        total += listing;
        total += detail;

        assert_eq!(total.requests, 3);
        assert_eq!(total.successes, 2);
        assert_eq!(total.failures, 1);
        assert_eq!(total.new_items, 3);
        assert_eq!(total.pruned_items, 1);
        assert!((listing.success_rate() - 50.0).abs() < f64::EPSILON);
        assert_eq!(RunStatistics::default().success_rate(), 0.0);
    }

    #[test]
    fn test_registry_statistics() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let old = now - Duration::days(120);
        let mut registry = Registry::new(&default_categories()[0], Path::new("/unused"));

        let mut skipped = SummaryEndpoint::new("Skipped", "https://s.test", now);
        skipped.skip = true;
        skipped.last_success_at = Some(now);
        registry.create_summary("fresh", skipped);
        registry.create_summary("stale", SummaryEndpoint::new("Stale", "https://o.test", old));

        let observation = ItemObservation {
            item_id: "A".to_string(),
            sub_brand: None,
            category: None,
        };
        registry.create_or_update_detail("stale", &observation, old);

        let stats = RegistryStatistics::collect(&registry, now, Duration::days(90));
        assert_eq!(stats.category, "banking");
        assert_eq!(stats.providers, 2);
        assert_eq!(stats.skipped_providers, 1);
        assert_eq!(stats.never_successful_providers, 1);
        assert_eq!(stats.stale_providers, 1);
        assert_eq!(stats.items, 1);
        assert_eq!(stats.stale_items, 1);
    }
}
