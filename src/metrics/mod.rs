//! Metrics for the decision and refresh paths.
//!
//! Counters are always incremented; a Prometheus registry is only needed to
//! expose them for scraping.
//!
//! # Available Metrics
//!
//! ## Gauges
//!
//! - `rl_live_model_loaded` - 1 once a model has been received
//! - `rl_live_model_version` - Version of the active model
//!
//! ## Counters
//!
//! - `rl_live_decisions` - Ranking decisions returned
//! - `rl_live_explore_only_decisions` - Decisions made before a model was loaded
//! - `rl_live_model_decisions` - Decisions delegated to the active model
//! - `rl_live_invalid_requests` - Requests rejected for invalid arguments or contexts
//! - `rl_live_log_failures` - Events the logger refused
//! - `rl_live_log_dropped` - Events skipped because the logger was full (warned once per full episode)
//! - `rl_live_outcomes` - Outcome events logged
//! - `rl_live_refresh_iterations` - Refresh ticks run
//! - `rl_live_model_updates` - Successful model swaps
//! - `rl_live_model_update_failures` - Rejected model bytes
//! - `rl_live_transport_failures` - Failed fetches
//!
//! # Example
//!
//! ```ignore
//! use prometheus::Registry;
//! use rl_live::LiveModelBuilder;
//!
//! let registry = Registry::new();
//! let model = LiveModelBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build()?;
//!
//! use prometheus::TextEncoder;
//! let encoder = TextEncoder::new();
//! let mut buffer = Vec::new();
//! encoder.encode(&registry.gather(), &mut buffer)?;
//! ```

mod prometheus;

pub use self::prometheus::LiveModelMetrics;
