//! Prometheus counters and gauges for a live model.
//!
//! | Operation | Cost |
//! |-----------|------|
//! | Counter increment | atomic fetch_add |
//! | Gauge set | atomic store |
//! | Registry lookup | never on the hot path |

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Prometheus metrics for a live model.
///
/// Clones share the underlying counters.
#[derive(Clone)]
pub struct LiveModelMetrics {
    // === Gauges ===
    /// 1 once a model has been received
    pub model_loaded: IntGauge,

    /// Version of the active model
    pub model_version: IntGauge,

    // === Counters: decision path ===
    pub decisions: IntCounter,

    pub explore_only_decisions: IntCounter,

    pub model_decisions: IntCounter,

    /// Requests rejected before any sampling or logging
    pub invalid_requests: IntCounter,

    pub log_failures: IntCounter,

    /// Events skipped under the drop policy
    pub log_dropped: IntCounter,

    pub outcomes: IntCounter,

    // === Counters: refresh path ===
    pub refresh_iterations: IntCounter,

    pub model_updates: IntCounter,

    pub model_update_failures: IntCounter,

    pub transport_failures: IntCounter,
}

impl Default for LiveModelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(prefix: &str) -> String {
    // [a-zA-Z_:] first, [a-zA-Z0-9_:] after
    prefix
        .chars()
        .enumerate()
        .map(|(i, c)| match c {
            c if c.is_ascii_alphabetic() || c == '_' || c == ':' => c,
            c if i > 0 && c.is_ascii_digit() => c,
            _ => '_',
        })
        .collect()
}

fn counter(prefix: &str, name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(format!("{prefix}_{name}"), help))
        .expect("metric creation should not fail")
}

fn gauge(prefix: &str, name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(format!("{prefix}_{name}"), help))
        .expect("metric creation should not fail")
}

impl LiveModelMetrics {
    /// Create metrics with the default prefix "rl_live".
    pub fn new() -> Self {
        Self::with_prefix("rl_live")
    }

    /// Create metrics named `{prefix}_decisions`, `{prefix}_model_updates`, etc.
    ///
    /// Characters Prometheus does not allow in names become underscores, so
    /// `"rl-live"` yields `rl_live_decisions`.
    pub fn with_prefix(prefix: &str) -> Self {
        let p = sanitize(prefix);
        Self {
            model_loaded: gauge(&p, "model_loaded", "1 once a model has been received"),
            model_version: gauge(&p, "model_version", "Version of the active model"),

            decisions: counter(&p, "decisions", "Ranking decisions returned"),
            explore_only_decisions: counter(
                &p,
                "explore_only_decisions",
                "Decisions made before a model was loaded",
            ),
            model_decisions: counter(
                &p,
                "model_decisions",
                "Decisions delegated to the active model",
            ),
            invalid_requests: counter(
                &p,
                "invalid_requests",
                "Requests rejected for invalid arguments or contexts",
            ),
            log_failures: counter(&p, "log_failures", "Events the logger refused"),
            log_dropped: counter(
                &p,
                "log_dropped",
                "Events skipped because the logger was full",
            ),
            outcomes: counter(&p, "outcomes", "Outcome events logged"),

            refresh_iterations: counter(&p, "refresh_iterations", "Refresh ticks run"),
            model_updates: counter(&p, "model_updates", "Successful model swaps"),
            model_update_failures: counter(
                &p,
                "model_update_failures",
                "Rejected model bytes",
            ),
            transport_failures: counter(&p, "transport_failures", "Failed fetches"),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.model_loaded.clone()))?;
        registry.register(Box::new(self.model_version.clone()))?;
        registry.register(Box::new(self.decisions.clone()))?;
        registry.register(Box::new(self.explore_only_decisions.clone()))?;
        registry.register(Box::new(self.model_decisions.clone()))?;
        registry.register(Box::new(self.invalid_requests.clone()))?;
        registry.register(Box::new(self.log_failures.clone()))?;
        registry.register(Box::new(self.log_dropped.clone()))?;
        registry.register(Box::new(self.outcomes.clone()))?;
        registry.register(Box::new(self.refresh_iterations.clone()))?;
        registry.register(Box::new(self.model_updates.clone()))?;
        registry.register(Box::new(self.model_update_failures.clone()))?;
        registry.register(Box::new(self.transport_failures.clone()))?;
        Ok(())
    }

    /// Record a returned decision.
    #[inline]
    pub fn record_decision(&self, explore_only: bool) {
        self.decisions.inc();
        if explore_only {
            self.explore_only_decisions.inc();
        } else {
            self.model_decisions.inc();
        }
    }

    /// Record a published model.
    #[inline]
    pub fn record_model_update(&self, version: u64) {
        self.model_updates.inc();
        self.model_loaded.set(1);
        self.model_version.set(i64::try_from(version).unwrap_or(i64::MAX));
    }
}

impl std::fmt::Debug for LiveModelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveModelMetrics")
            .field("decisions", &self.decisions.get())
            .field("log_failures", &self.log_failures.get())
            .field("model_updates", &self.model_updates.get())
            .field("model_version", &self.model_version.get())
            .finish()
    }
}
