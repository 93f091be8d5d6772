//! # rl-live
//!
//! **Client-side decisions for contextual bandits**
//!
//! Ranks the actions of a context in-process, logs every decision for later
//! training, and keeps the scoring model fresh from a background task.
//!
//! ## Features
//!
//! - **Deterministic exploration**: the same `(app_id, event_id, context)` always
//!   yields the same ranking against the same model, on every platform
//! - **Explore-only start**: decisions are valid before any model arrives
//! - **Lock-free hot swap**: a refresh replaces the model atomically; in-flight
//!   requests finish against the model they started with
//! - **Non-blocking logging**: a full sink is reported, never waited on
//! - **Flexible Configuration**: files (TOML/YAML/JSON), environment variables, or code
//! - **CLI Integration**: Built-in clap support for command-line overrides
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use rl_live::{LiveModelBuilder, QueueLogger};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let events = Arc::new(QueueLogger::default());
//!     let model = LiveModelBuilder::new()
//!         .app_id("news-feed")
//!         .model_src("FILE")
//!         .property("file.model_path", "/var/models/current.json")
//!         .decision_logger(events.clone())
//!         .build()?;
//!
//!     let context = r#"{"User":{"id":"u1"},"_multi":[{"a":1},{"a":2}]}"#;
//!     let response = model.choose_rank("event-1", context)?;
//!     println!("show action {}", response.chosen_action_id());
//!
//!     model.report_outcome("event-1", 1.0)?;
//!
//!     for line in events.drain() {
//!         // ship to the training pipeline
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! app_id = "news-feed"
//! initial_epsilon = 0.2
//! model_src = "FILE"
//! model_implementation = "TABLE"
//! model_refresh_interval_ms = 60000
//! log_full_policy = "drop"
//!
//! [properties]
//! "file.model_path" = "/var/models/current.json"
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("RL_LIVE")`:
//! - `RL_LIVE_APP_ID=news-feed`
//! - `RL_LIVE_INITIAL_EPSILON=0.1`
//! - `RL_LIVE_MODEL_SRC=FILE`
//!
//! ## Event Format
//!
//! Decision events are single-line JSON:
//!
//! ```text
//! {"Version":"1","EventId":"event-1","a":[2,1],"c":{...},"p":[0.1,0.9],"VWState":{"m":"table-7"}}
//! ```
//!
//! Action ids in `a` are 1-based; `p` holds the matching probabilities.
//! Outcome events are `{"EventId":"event-1","v":1}`.
//!
//! ## Thread Naming
//!
//! The refresh task runs on its own runtime with threads named
//! `{prefix}-refresh-0000`, `{prefix}-refresh-0001`, ...

pub mod actions;
pub mod builder;
pub mod config;
pub mod error;
pub mod event;
pub mod factory;
pub mod live_model;
pub mod logger;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod refresh;
pub mod sampler;
pub mod transport;

pub use actions::{ActionCountResolver, MultiActionResolver};
pub use builder::{LiveModelArgs, LiveModelBuilder};
pub use config::{LiveModelConfig, LogFullPolicy};
pub use error::{ErrorCallback, ErrorKind, LiveModelError, Result, TracingErrorCallback};
pub use event::{ActionProbability, DecisionRecord, Outcome, RankingResponse};
pub use factory::{ModelFactory, TransportFactory};
pub use live_model::{Collaborators, LiveModel};
pub use logger::{EventLogger, NullLogger, QueueLogger};
pub use metrics::LiveModelMetrics;
pub use model::{ActiveModel, ModelHandle, ScoringModel, TableModel};
pub use refresh::{ModelDownloader, RefreshOutcome, RefreshTask};
pub use transport::{DataTransport, FileTransport, ModelData, NoneTransport};
