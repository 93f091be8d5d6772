//! Scoring models and the hot-swappable model handle.
//!
//! # Architecture
//!
//! ```text
//! ModelHandle
//!   ├── prototype: Box<dyn ScoringModel>       (factory-built, never serves)
//!   ├── active: ArcSwapOption<ActiveModel>     (None until the first update)
//!   ├── loaded: AtomicBool                     ("model received" flag)
//!   └── update_lock: Mutex<()>                 (one update at a time)
//!
//! request path:  current() ─► Arc<ActiveModel> ─► model.choose_rank(seed, ctx)
//! refresh path:  apply_update(data) ─► base.update(data) ─► store(Some(new))
//! ```
//!
//! Readers never take a lock. A reader that loaded the previous `Arc` keeps
//! scoring against that complete model while the next one is published.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::actions::{ActionCountResolver, MultiActionResolver};
use crate::error::{LiveModelError, Result};
use crate::event::RankingResponse;
use crate::sampler;
use crate::transport::ModelData;

/// A model able to rank the actions of a context.
pub trait ScoringModel: Send + Sync {
    /// Identifier recorded with every decision this model makes.
    fn model_id(&self) -> &str;

    /// Rank the actions of `context`, drawing any randomness from `seed`.
    fn choose_rank(&self, seed: u64, context: &str) -> Result<RankingResponse>;

    /// Validate `data` and build the model that replaces this one.
    ///
    /// `self` is left untouched; on error the caller keeps serving it.
    fn update(&self, data: &ModelData) -> Result<Box<dyn ScoringModel>>;
}

/// A published model together with its position in the update sequence.
pub struct ActiveModel {
    version: u64,
    model_id: String,
    model: Box<dyn ScoringModel>,
}

impl ActiveModel {
    /// 1 for the first model received, incremented on every update.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn model(&self) -> &dyn ScoringModel {
        self.model.as_ref()
    }

    pub fn choose_rank(&self, seed: u64, context: &str) -> Result<RankingResponse> {
        self.model.choose_rank(seed, context)
    }
}

impl fmt::Debug for ActiveModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveModel")
            .field("version", &self.version)
            .field("model_id", &self.model_id)
            .finish()
    }
}

/// Shared slot holding the model currently serving requests.
pub struct ModelHandle {
    prototype: Box<dyn ScoringModel>,
    active: ArcSwapOption<ActiveModel>,
    loaded: AtomicBool,
    update_lock: Mutex<()>,
}

impl ModelHandle {
    /// Create an empty handle. `prototype` is the base for the first update.
    pub fn new(prototype: Box<dyn ScoringModel>) -> Self {
        Self {
            prototype,
            active: ArcSwapOption::empty(),
            loaded: AtomicBool::new(false),
            update_lock: Mutex::new(()),
        }
    }

    /// The model serving requests, or `None` before the first update.
    pub fn current(&self) -> Option<Arc<ActiveModel>> {
        self.active.load_full()
    }

    /// Whether a model has ever been received. Never goes back to `false`.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Version of the current model, 0 while empty.
    pub fn version(&self) -> u64 {
        self.current().map_or(0, |active| active.version)
    }

    /// Build a new model from `data` and publish it.
    ///
    /// Returns the new version. On failure nothing is published and the
    /// error is always a model update error.
    pub fn apply_update(&self, data: &ModelData) -> Result<u64> {
        let _guard = self.update_lock.lock();

        let current = self.active.load_full();
        let base: &dyn ScoringModel = match &current {
            Some(active) => active.model.as_ref(),
            None => self.prototype.as_ref(),
        };

        let model = base.update(data).map_err(|e| match e {
            LiveModelError::ModelUpdate(_) => e,
            other => LiveModelError::ModelUpdate(other.to_string()),
        })?;

        let version = current.as_ref().map_or(0, |active| active.version) + 1;
        let model_id = model.model_id().to_string();
        debug!(version, model_id = %model_id, "publishing model");

        self.active.store(Some(Arc::new(ActiveModel {
            version,
            model_id,
            model,
        })));
        self.loaded.store(true, Ordering::Release);
        Ok(version)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("loaded", &self.is_loaded())
            .field("active", &self.current())
            .finish()
    }
}

/// Wire format of a [`TableModel`].
#[derive(Debug, Deserialize)]
struct TableWire {
    id: String,
    epsilon: f32,
    scores: Vec<f32>,
}

/// Epsilon-greedy model over a fixed table of per-action scores.
///
/// Model bytes are JSON:
///
/// ```text
/// {"id": "table-7", "epsilon": 0.1, "scores": [0.2, 0.9, 0.4]}
/// ```
///
/// The highest-scoring action among those the context offers receives
/// `1 - epsilon` extra probability. Actions without a score never win unless
/// none of the offered actions have one.
pub struct TableModel {
    model_id: String,
    epsilon: f32,
    scores: Vec<f32>,
    resolver: Arc<dyn ActionCountResolver>,
}

impl TableModel {
    /// Empty prototype using `resolver` to count actions.
    pub fn new(resolver: Arc<dyn ActionCountResolver>) -> Self {
        Self {
            model_id: String::new(),
            epsilon: 0.0,
            scores: Vec::new(),
            resolver,
        }
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    fn top_action(&self, action_count: usize) -> usize {
        let offered = &self.scores[..self.scores.len().min(action_count)];
        offered
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (index, score)| match best {
                Some((_, top)) if top >= *score => best,
                _ => Some((index, *score)),
            })
            .map_or(0, |(index, _)| index)
    }
}

impl Default for TableModel {
    fn default() -> Self {
        Self::new(Arc::new(MultiActionResolver))
    }
}

impl ScoringModel for TableModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn choose_rank(&self, seed: u64, context: &str) -> Result<RankingResponse> {
        if self.scores.is_empty() {
            return Err(LiveModelError::Exploration(
                "table model has no scores".to_string(),
            ));
        }
        let action_count = self.resolver.action_count(context)?;
        let top = self.top_action(action_count);
        let pdf = sampler::epsilon_greedy(self.epsilon, top, action_count)?;
        let chosen = sampler::sample_from_pdf(seed, &pdf)?;

        let mut response = RankingResponse::from_pdf(&pdf, chosen)?;
        response.set_model_id(self.model_id.as_str());
        Ok(response)
    }

    fn update(&self, data: &ModelData) -> Result<Box<dyn ScoringModel>> {
        let wire: TableWire = serde_json::from_slice(data.data())
            .map_err(|e| LiveModelError::ModelUpdate(format!("malformed table model: {e}")))?;

        if wire.id.is_empty() {
            return Err(LiveModelError::ModelUpdate(
                "table model id is empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&wire.epsilon) {
            return Err(LiveModelError::ModelUpdate(format!(
                "table model epsilon {} outside [0, 1]",
                wire.epsilon
            )));
        }
        if wire.scores.is_empty() || wire.scores.iter().any(|s| !s.is_finite()) {
            return Err(LiveModelError::ModelUpdate(
                "table model needs at least one finite score".to_string(),
            ));
        }

        Ok(Box::new(TableModel {
            model_id: wire.id,
            epsilon: wire.epsilon,
            scores: wire.scores,
            resolver: Arc::clone(&self.resolver),
        }))
    }
}

impl fmt::Debug for TableModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableModel")
            .field("model_id", &self.model_id)
            .field("epsilon", &self.epsilon)
            .field("scores", &self.scores)
            .finish()
    }
}
