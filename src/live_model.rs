//! Decision orchestrator.
//!
//! # Architecture
//!
//! ```text
//! choose_rank(event_id, context)
//!   │ validate arguments
//!   │ seed = hash(event_id) + hash(app_id)
//!   ├── no model yet ─► epsilon-greedy over the context's actions ("N/A")
//!   └── model loaded ─► active.choose_rank(seed, context), ranking checked
//!   │ serialize into a pooled buffer
//!   └── decision logger.append()
//!
//! RefreshTask (background) ─► ModelDownloader ─► ModelHandle::apply_update
//! ```
//!
//! Requests run concurrently on caller threads and never wait on the refresh
//! task. The only state they share with it is the model handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::actions::{ActionCountResolver, MultiActionResolver};
use crate::config::{LiveModelConfig, LogFullPolicy};
use crate::error::{ErrorCallback, LiveModelError, Result, TracingErrorCallback};
use crate::event::{
    BufferFactory, DataBuffer, Outcome, OutcomeEvent, RankingEvent, RankingResponse, NO_MODEL_ID,
};
use crate::factory::{default_models, default_transports, ModelFactory, TransportFactory};
use crate::logger::{EventLogger, NullLogger};
use crate::metrics::LiveModelMetrics;
use crate::model::ModelHandle;
use crate::pool::ObjectPool;
use crate::refresh::{ModelDownloader, RefreshTask};
use crate::sampler;

/// Pluggable parts of a [`LiveModel`].
///
/// `LiveModelBuilder` assembles these; construct directly for full control.
pub struct Collaborators {
    /// Sink for decision events.
    pub decision_logger: Arc<dyn EventLogger>,
    /// Sink for outcome events. May be the same instance as `decision_logger`.
    pub outcome_logger: Arc<dyn EventLogger>,
    /// Receives errors raised by the background refresh.
    pub error_callback: Arc<dyn ErrorCallback>,
    /// Counts the actions of a context while no model is loaded.
    pub resolver: Arc<dyn ActionCountResolver>,
    pub transports: TransportFactory,
    pub models: ModelFactory,
    pub metrics: LiveModelMetrics,
}

impl Default for Collaborators {
    fn default() -> Self {
        let resolver: Arc<dyn ActionCountResolver> = Arc::new(MultiActionResolver);
        let logger: Arc<dyn EventLogger> = Arc::new(NullLogger);
        Self {
            decision_logger: Arc::clone(&logger),
            outcome_logger: logger,
            error_callback: Arc::new(TracingErrorCallback),
            models: default_models(Arc::clone(&resolver)),
            resolver,
            transports: default_transports(),
            metrics: LiveModelMetrics::new(),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("transports", &self.transports)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

/// State that only exists after a successful `init`.
struct Running {
    handle: Arc<ModelHandle>,
    downloader: Arc<ModelDownloader>,
    salt: u64,
    initial_epsilon: f32,
}

/// Client-side decision engine.
///
/// Call [`init`](LiveModel::init) once, then share the model (e.g. in an
/// `Arc`) and call [`choose_rank`](LiveModel::choose_rank) and
/// [`report_outcome`](LiveModel::report_outcome) from any thread.
///
/// # Examples
///
/// ```ignore
/// use rl_live::{LiveModel, LiveModelConfig};
///
/// let mut model = LiveModel::new(LiveModelConfig::default());
/// model.init()?;
///
/// let response = model.choose_rank("event-1", r#"{"_multi":[{"a":1},{"a":2}]}"#)?;
/// println!("chosen action {}", response.chosen_action_id());
/// model.report_outcome("event-1", 1.0)?;
/// ```
pub struct LiveModel {
    config: LiveModelConfig,
    parts: Collaborators,
    buffers: ObjectPool<DataBuffer, BufferFactory>,
    running: Option<Running>,
    refresh: Mutex<Option<RefreshTask>>,
    // set while the decision logger is known to be full under the drop policy
    dropping: AtomicBool,
}

impl LiveModel {
    /// Create an uninitialized model with default collaborators.
    pub fn new(config: LiveModelConfig) -> Self {
        Self::with_collaborators(config, Collaborators::default())
    }

    /// Create an uninitialized model with the given collaborators.
    pub fn with_collaborators(config: LiveModelConfig, parts: Collaborators) -> Self {
        Self {
            config,
            parts,
            buffers: ObjectPool::new(BufferFactory::default()),
            running: None,
            refresh: Mutex::new(None),
            dropping: AtomicBool::new(false),
        }
    }

    /// Bring up loggers, the model and the background refresh, in that order.
    ///
    /// Fails fast: the first failing step's error is returned and the model
    /// stays uninitialized.
    pub fn init(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(LiveModelError::AlreadyInitialized);
        }

        let initial_epsilon = self.config.initial_epsilon;
        if !(0.0..=1.0).contains(&initial_epsilon) {
            return Err(LiveModelError::InvalidArgument(format!(
                "initial_epsilon {initial_epsilon} outside [0, 1]"
            )));
        }

        self.parts.decision_logger.init()?;
        if !std::ptr::addr_eq(
            Arc::as_ptr(&self.parts.decision_logger),
            Arc::as_ptr(&self.parts.outcome_logger),
        ) {
            self.parts.outcome_logger.init()?;
        }

        let prototype = self
            .parts
            .models
            .create(&self.config.model_implementation, &self.config)?;
        let handle = Arc::new(ModelHandle::new(prototype));

        let transport = self
            .parts
            .transports
            .create(&self.config.model_src, &self.config)?;
        let downloader = Arc::new(ModelDownloader::new(
            transport,
            Arc::clone(&handle),
            Arc::clone(&self.parts.error_callback),
            self.parts.metrics.clone(),
        ));

        let task = RefreshTask::start(
            Arc::clone(&downloader),
            self.config.refresh_interval(),
            &self.config.prefix,
        )?;
        *self.refresh.lock() = Some(task);

        self.running = Some(Running {
            handle,
            downloader,
            salt: sampler::application_salt(&self.config.app_id),
            initial_epsilon,
        });

        info!(
            app_id = %self.config.app_id,
            model_src = %self.config.model_src,
            model_implementation = %self.config.model_implementation,
            initial_epsilon,
            refresh_interval_ms = self.config.model_refresh_interval_ms,
            "live model initialized"
        );
        Ok(())
    }

    fn running(&self) -> Result<&Running> {
        self.running.as_ref().ok_or(LiveModelError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    /// Whether a model has been received since `init`.
    pub fn is_model_loaded(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.handle.is_loaded())
    }

    /// Version of the active model, 0 before the first one arrives.
    pub fn model_version(&self) -> u64 {
        self.running
            .as_ref()
            .map_or(0, |running| running.handle.version())
    }

    pub fn config(&self) -> &LiveModelConfig {
        &self.config
    }

    pub fn metrics(&self) -> &LiveModelMetrics {
        &self.parts.metrics
    }

    /// Rank the actions of `context` for `event_id` and log the decision.
    ///
    /// The same `(app_id, event_id, context)` against the same model always
    /// yields the same response. If the logger rejects the event, the error
    /// carries the computed response (see [`LiveModelError::into_response`]).
    pub fn choose_rank(&self, event_id: &str, context: &str) -> Result<RankingResponse> {
        if event_id.is_empty() {
            self.parts.metrics.invalid_requests.inc();
            return Err(LiveModelError::InvalidArgument("event id is empty".to_string()));
        }
        if context.is_empty() {
            self.parts.metrics.invalid_requests.inc();
            return Err(LiveModelError::InvalidArgument("context is empty".to_string()));
        }
        let running = self.running()?;

        let seed = sampler::seed_for(running.salt, event_id);
        let ranked = match running.handle.current() {
            Some(active) => active
                .choose_rank(seed, context)
                .and_then(|response| {
                    response.check_well_formed().inspect_err(|e| {
                        warn!(
                            event_id,
                            model_id = active.model_id(),
                            %e,
                            "model returned a malformed ranking"
                        );
                    })?;
                    Ok(response)
                })
                .map(|response| (response, false)),
            None => self
                .explore_only(running, seed, context)
                .map(|response| (response, true)),
        };
        let (mut response, explore_only) = ranked.inspect_err(|e| {
            if matches!(e, LiveModelError::InvalidArgument(_)) {
                self.parts.metrics.invalid_requests.inc();
            }
        })?;
        response.set_event_id(event_id);

        self.log_decision(context, response, explore_only)
    }

    /// [`choose_rank`](LiveModel::choose_rank) with a generated v4 UUID event id.
    pub fn choose_rank_auto(&self, context: &str) -> Result<RankingResponse> {
        let event_id = uuid::Uuid::new_v4().to_string();
        self.choose_rank(&event_id, context)
    }

    /// Uniform pick over the context's actions, reported against an
    /// epsilon-greedy distribution with action 0 as the nominal top action.
    fn explore_only(&self, running: &Running, seed: u64, context: &str) -> Result<RankingResponse> {
        let action_count = self.parts.resolver.action_count(context)?;
        let pdf = sampler::epsilon_greedy(running.initial_epsilon, 0, action_count)?;
        let chosen = sampler::uniform_int(seed, 0, action_count as u64 - 1)? as usize;

        let mut response = RankingResponse::from_pdf(&pdf, chosen)?;
        response.set_model_id(NO_MODEL_ID);
        Ok(response)
    }

    fn log_decision(
        &self,
        context: &str,
        response: RankingResponse,
        explore_only: bool,
    ) -> Result<RankingResponse> {
        let metrics = &self.parts.metrics;
        metrics.record_decision(explore_only);

        let logger = &self.parts.decision_logger;
        if self.config.log_full_policy == LogFullPolicy::Drop {
            if logger.is_full() {
                metrics.log_dropped.inc();
                if !self.dropping.swap(true, Ordering::Relaxed) {
                    warn!(event_id = response.event_id(), "decision logger is full, dropping events");
                }
                return Ok(response);
            }
            if self.dropping.swap(false, Ordering::Relaxed) {
                info!(
                    dropped = metrics.log_dropped.get(),
                    "decision logger has room again"
                );
            }
        }

        let mut buf = self.buffers.checkout();
        let appended = RankingEvent::serialize(&mut buf, response.event_id(), context, &response)
            .and_then(|()| logger.append(buf.as_str()));

        match appended {
            Ok(()) => {
                debug!(
                    event_id = response.event_id(),
                    chosen = response.chosen_action_id(),
                    model_id = response.model_id(),
                    "decision logged"
                );
                Ok(response)
            }
            Err(e) => {
                metrics.log_failures.inc();
                warn!(event_id = response.event_id(), %e, "failed to log decision");
                let message = match e {
                    LiveModelError::Logging { message, .. } => message,
                    other => other.to_string(),
                };
                Err(LiveModelError::Logging {
                    message,
                    response: Some(Box::new(response)),
                })
            }
        }
    }

    /// Log an observed outcome for a previous decision.
    pub fn report_outcome(&self, event_id: &str, outcome: impl Into<Outcome>) -> Result<()> {
        let outcome = outcome.into();
        if event_id.is_empty() {
            self.parts.metrics.invalid_requests.inc();
            return Err(LiveModelError::InvalidArgument("event id is empty".to_string()));
        }
        match &outcome {
            Outcome::Text(text) if text.is_empty() => {
                self.parts.metrics.invalid_requests.inc();
                return Err(LiveModelError::InvalidArgument("outcome is empty".to_string()));
            }
            Outcome::Value(value) if !value.is_finite() => {
                self.parts.metrics.invalid_requests.inc();
                return Err(LiveModelError::InvalidArgument(format!(
                    "outcome {value} is not a finite number"
                )));
            }
            _ => {}
        }
        self.running()?;

        let mut buf = self.buffers.checkout();
        OutcomeEvent::serialize(&mut buf, event_id, &outcome)?;
        self.parts
            .outcome_logger
            .append(buf.as_str())
            .inspect_err(|e| {
                self.parts.metrics.log_failures.inc();
                warn!(event_id, %e, "failed to log outcome");
            })?;

        self.parts.metrics.outcomes.inc();
        Ok(())
    }

    /// Report a JSON outcome fragment, e.g. `{"clicked":true}`.
    pub fn report_outcome_text(&self, event_id: &str, outcome: &str) -> Result<()> {
        self.report_outcome(event_id, Outcome::Text(outcome.to_string()))
    }

    /// Report a numeric reward.
    pub fn report_outcome_value(&self, event_id: &str, value: f32) -> Result<()> {
        self.report_outcome(event_id, Outcome::Value(value))
    }

    /// Run one refresh iteration on the calling thread.
    ///
    /// Returns the new model version if a model was published. Errors are
    /// returned here rather than sent to the error callback.
    pub fn refresh_now(&self) -> Result<Option<u64>> {
        self.running()?.downloader.try_iteration()
    }

    /// Stop the background refresh. Decisions keep using the last model.
    pub fn shutdown(&self) {
        if let Some(mut task) = self.refresh.lock().take() {
            task.shutdown();
            info!(app_id = %self.config.app_id, "live model refresh stopped");
        }
    }
}

impl std::fmt::Debug for LiveModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveModel")
            .field("app_id", &self.config.app_id)
            .field("initialized", &self.is_initialized())
            .field("model_version", &self.model_version())
            .field("buffers", &self.buffers)
            .finish()
    }
}
