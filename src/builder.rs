//! Builder for constructing live models.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;
use tracing::warn;

use crate::actions::{ActionCountResolver, MultiActionResolver};
use crate::config::{LiveModelConfig, LogFullPolicy};
use crate::error::{ErrorCallback, Result, TracingErrorCallback};
use crate::factory::{default_models, default_transports, TransportFactory};
use crate::live_model::{Collaborators, LiveModel};
use crate::logger::{EventLogger, NullLogger};
use crate::metrics::LiveModelMetrics;
use crate::model::ScoringModel;
use crate::transport::DataTransport;

type ModelMaker = Box<dyn Fn(&LiveModelConfig) -> Result<Box<dyn ScoringModel>> + Send + Sync>;

/// Builder for constructing an initialized [`LiveModel`].
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
///
/// # Examples
///
/// ```ignore
/// use rl_live::LiveModelBuilder;
///
/// let model = LiveModelBuilder::new()
///     .file("rl-live.toml")
///     .env_prefix("RL_LIVE")
///     .app_id("news-feed")
///     .decision_logger(logger.clone())
///     .build()?;
/// ```
pub struct LiveModelBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
    decision_logger: Option<Arc<dyn EventLogger>>,
    outcome_logger: Option<Arc<dyn EventLogger>>,
    error_callback: Option<Arc<dyn ErrorCallback>>,
    resolver: Option<Arc<dyn ActionCountResolver>>,
    transports: TransportFactory,
    models: Vec<(String, ModelMaker)>,
}

impl Default for LiveModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LiveModelBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveModelBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .field("transports", &self.transports)
            .field(
                "models",
                &self.models.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl LiveModelBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(LiveModelConfig::default())),
            prometheus_registry: None,
            decision_logger: None,
            outcome_logger: None,
            error_callback: None,
            resolver: None,
            transports: default_transports(),
            models: Vec::new(),
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Variables are read as `{PREFIX}_{KEY}`, e.g. `RL_LIVE_APP_ID`,
    /// `RL_LIVE_INITIAL_EPSILON`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        let prefix = format!("{}_", prefix.trim_end_matches('_'));
        self.figment = self.figment.merge(Env::prefixed(&prefix).split("__"));
        self
    }

    /// Set the thread name prefix of the refresh runtime and the metric prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("prefix", prefix.into()));
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("app_id", app_id.into()));
        self
    }

    /// Exploration rate while no model is loaded. Default is 0.2.
    pub fn initial_epsilon(mut self, epsilon: f32) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("initial_epsilon", epsilon));
        self
    }

    /// Name of the transport to fetch models with. Default is `NONE`.
    pub fn model_src(mut self, name: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("model_src", name.into()));
        self
    }

    /// Name of the model implementation. Default is `TABLE`.
    pub fn model_implementation(mut self, name: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("model_implementation", name.into()));
        self
    }

    /// Default is one minute.
    pub fn model_refresh_interval_ms(mut self, interval_ms: u64) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("model_refresh_interval_ms", interval_ms));
        self
    }

    pub fn log_full_policy(mut self, policy: LogFullPolicy) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("log_full_policy", policy));
        self
    }

    /// Set an implementation-specific property such as `file.model_path`.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let entry = BTreeMap::from([(key.into(), value.into())]);
        self.figment = self
            .figment
            .merge(Serialized::default("properties", entry));
        self
    }

    /// Sink for decision events. Also used for outcomes unless
    /// [`outcome_logger`](Self::outcome_logger) is set.
    pub fn decision_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.decision_logger = Some(logger);
        self
    }

    pub fn outcome_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.outcome_logger = Some(logger);
        self
    }

    /// Receiver for background refresh errors. Defaults to a `tracing` warning.
    pub fn error_callback(mut self, callback: Arc<dyn ErrorCallback>) -> Self {
        self.error_callback = Some(callback);
        self
    }

    /// Action counting for contexts. Defaults to the `_multi` array.
    pub fn action_resolver(mut self, resolver: Arc<dyn ActionCountResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register a transport selectable through `model_src`.
    pub fn register_transport<F>(mut self, name: impl Into<String>, maker: F) -> Self
    where
        F: Fn(&LiveModelConfig) -> Result<Box<dyn DataTransport>> + Send + Sync + 'static,
    {
        self.transports.register(name, maker);
        self
    }

    /// Register a model selectable through `model_implementation`.
    pub fn register_model<F>(mut self, name: impl Into<String>, maker: F) -> Self
    where
        F: Fn(&LiveModelConfig) -> Result<Box<dyn ScoringModel>> + Send + Sync + 'static,
    {
        self.models.push((name.into(), Box::new(maker)));
        self
    }

    /// Provide an external Prometheus registry for metrics exposition.
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `LiveModelArgs` struct.
    pub fn with_cli_args(mut self, args: &LiveModelArgs) -> Self {
        if let Some(ref path) = args.rl_config {
            self = self.file(path);
        }
        if let Some(ref prefix) = args.rl_prefix {
            self = self.prefix(prefix.clone());
        }
        if let Some(ref app_id) = args.rl_app_id {
            self = self.app_id(app_id.clone());
        }
        if let Some(epsilon) = args.rl_initial_epsilon {
            self = self.initial_epsilon(epsilon);
        }
        if let Some(ref src) = args.rl_model_src {
            self = self.model_src(src.clone());
        }
        if let Some(ref implementation) = args.rl_model_implementation {
            self = self.model_implementation(implementation.clone());
        }
        if let Some(interval_ms) = args.rl_refresh_interval_ms {
            self = self.model_refresh_interval_ms(interval_ms);
        }
        for property in &args.rl_property {
            match property.split_once('=') {
                Some((key, value)) => self = self.property(key.trim(), value.trim()),
                None => warn!(%property, "ignoring property without `=`"),
            }
        }
        self
    }

    /// Extract the merged configuration without building.
    pub fn config(&self) -> Result<LiveModelConfig> {
        Ok(self.figment.extract().map_err(Box::new)?)
    }

    /// Build and initialize the live model.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - A configured implementation name is not registered
    /// - A logger, model or transport fails to initialize
    /// - The refresh runtime cannot be built
    pub fn build(self) -> Result<LiveModel> {
        let config = self.config()?;

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(MultiActionResolver));
        let mut models = default_models(Arc::clone(&resolver));
        for (name, maker) in self.models {
            models.register(name, maker);
        }

        let decision_logger = self
            .decision_logger
            .unwrap_or_else(|| Arc::new(NullLogger));
        let outcome_logger = self
            .outcome_logger
            .unwrap_or_else(|| Arc::clone(&decision_logger));

        let metrics = LiveModelMetrics::with_prefix(&config.prefix);
        if let Some(ref registry) = self.prometheus_registry {
            if let Err(e) = metrics.register(registry) {
                warn!(%e, "failed to register prometheus metrics");
            }
        }

        let parts = Collaborators {
            decision_logger,
            outcome_logger,
            error_callback: self
                .error_callback
                .unwrap_or_else(|| Arc::new(TracingErrorCallback)),
            resolver,
            transports: self.transports,
            models,
            metrics,
        };

        let mut model = LiveModel::with_collaborators(config, parts);
        model.init()?;
        Ok(model)
    }
}

/// CLI arguments for live model configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `LiveModelBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use rl_live::{LiveModelArgs, LiveModelBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     rl: LiveModelArgs,
/// }
///
/// let args = MyArgs::parse();
/// let model = LiveModelBuilder::new()
///     .with_cli_args(&args.rl)
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct LiveModelArgs {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long)]
    pub rl_config: Option<String>,

    /// Thread and metric name prefix
    #[arg(long)]
    pub rl_prefix: Option<String>,

    /// Application id mixed into exploration seeds
    #[arg(long)]
    pub rl_app_id: Option<String>,

    /// Exploration rate before a model is loaded
    #[arg(long)]
    pub rl_initial_epsilon: Option<f32>,

    /// Model transport name (e.g. NONE, FILE)
    #[arg(long)]
    pub rl_model_src: Option<String>,

    /// Model implementation name (e.g. TABLE)
    #[arg(long)]
    pub rl_model_implementation: Option<String>,

    /// Model refresh interval in milliseconds
    #[arg(long)]
    pub rl_refresh_interval_ms: Option<u64>,

    /// Implementation property as key=value (repeatable)
    #[arg(long)]
    pub rl_property: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::logger::QueueLogger;
    use crate::transport::{FILE_TRANSPORT, MODEL_PATH_KEY};
    use std::io::Write;

    #[test]
    fn test_builder_defaults() {
        let config = LiveModelBuilder::new().config().unwrap();
        assert_eq!(config.prefix, "rl-live");
        assert_eq!(config.app_id, "");
        assert_eq!(config.model_src, "NONE");
        assert_eq!(config.model_implementation, "TABLE");
        assert_eq!(config.model_refresh_interval_ms, 60_000);
    }

    #[test]
    fn test_builder_programmatic_override() {
        let config = LiveModelBuilder::new()
            .prefix("ranker")
            .app_id("news")
            .initial_epsilon(0.05)
            .model_src(FILE_TRANSPORT)
            .model_refresh_interval_ms(250)
            .log_full_policy(LogFullPolicy::Drop)
            .property(MODEL_PATH_KEY, "/models/a.json")
            .property("extra", "1")
            .config()
            .unwrap();

        assert_eq!(config.prefix, "ranker");
        assert_eq!(config.app_id, "news");
        assert!((config.initial_epsilon - 0.05).abs() < f32::EPSILON);
        assert_eq!(config.model_src, "FILE");
        assert_eq!(config.model_refresh_interval_ms, 250);
        assert_eq!(config.log_full_policy, LogFullPolicy::Drop);
        assert_eq!(config.get(MODEL_PATH_KEY, ""), "/models/a.json");
        assert_eq!(config.get_int("extra", 0), 1);
    }

    #[test]
    fn test_builder_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "app_id = \"from-file\"\ninitial_epsilon = 0.3").unwrap();
        file.flush().unwrap();

        let config = LiveModelBuilder::new()
            .file(file.path())
            .config()
            .unwrap();
        assert_eq!(config.app_id, "from-file");
        assert!((config.initial_epsilon - 0.3).abs() < f32::EPSILON);

        // programmatic values merged later win
        let config = LiveModelBuilder::new()
            .file(file.path())
            .app_id("override")
            .config()
            .unwrap();
        assert_eq!(config.app_id, "override");
    }

    #[test]
    fn test_builder_bad_value() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"initial_epsilon": "lots"}}"#).unwrap();
        file.flush().unwrap();

        let err = LiveModelBuilder::new()
            .file(file.path())
            .config()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_builder_cli_args() {
        let args = LiveModelArgs {
            rl_app_id: Some("cli-app".to_string()),
            rl_initial_epsilon: Some(0.5),
            rl_model_src: Some(FILE_TRANSPORT.to_string()),
            rl_property: vec![
                format!("{MODEL_PATH_KEY} = /tmp/m.json"),
                "malformed".to_string(),
            ],
            ..LiveModelArgs::default()
        };

        let config = LiveModelBuilder::new()
            .app_id("original")
            .prefix("kept")
            .with_cli_args(&args)
            .config()
            .unwrap();

        // CLI args override programmatic values
        assert_eq!(config.app_id, "cli-app");
        assert!((config.initial_epsilon - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.model_src, "FILE");
        assert_eq!(config.get(MODEL_PATH_KEY, ""), "/tmp/m.json");
        // unset args leave earlier values alone
        assert_eq!(config.prefix, "kept");
    }

    #[test]
    fn test_build_initializes() {
        let logger = Arc::new(QueueLogger::new(8));
        let registry = Registry::new();
        let model = LiveModelBuilder::new()
            .prefix("built")
            .decision_logger(logger.clone())
            .prometheus_registry(registry.clone())
            .build()
            .unwrap();

        assert!(model.is_initialized());
        model
            .choose_rank("ev1", r#"{"_multi":[{},{}]}"#)
            .unwrap();
        // outcomes share the decision logger by default
        model.report_outcome("ev1", 1.0).unwrap();
        assert_eq!(logger.len(), 2);

        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "built_decisions"));
    }

    #[test]
    fn test_build_with_custom_model() {
        let err = LiveModelBuilder::new()
            .model_implementation("CUSTOM")
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown model implementation: CUSTOM");

        let model = LiveModelBuilder::new()
            .model_implementation("CUSTOM")
            .register_model("CUSTOM", |_: &LiveModelConfig| -> Result<Box<dyn ScoringModel>> {
                Ok(Box::new(crate::model::TableModel::default()))
            })
            .build()
            .unwrap();
        assert!(!model.is_model_loaded());
    }
}
