//! State module for tracking endpoint health across runs
//!
//! # Components
//!
//! - `SummaryEndpoint`: a brand's listing endpoint with sighting and success timestamps
//! - `DetailEndpoint`: a per-item detail endpoint with the same lifecycle fields
//! - `is_stale`: the dual staleness rule used to prune both
//! - `Clock`: injectable time source for request timestamps

mod clock;
mod detail_endpoint;
mod staleness;
mod summary_endpoint;

// Re-export main types
pub use clock::{Clock, FixedClock, SystemClock};
pub use detail_endpoint::{DetailEndpoint, ItemObservation};
pub use staleness::{is_stale, STALENESS_WINDOW_DAYS};
pub use summary_endpoint::SummaryEndpoint;
