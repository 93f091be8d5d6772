//! Name-keyed factories for pluggable collaborators.
//!
//! `LiveModel::init` looks up the transport by `model_src` and the model by
//! `model_implementation`. Applications register their own implementations
//! under new names, or replace a built-in by registering over its name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::actions::ActionCountResolver;
use crate::config::{LiveModelConfig, TABLE_MODEL};
use crate::error::{LiveModelError, Result};
use crate::model::{ScoringModel, TableModel};
use crate::transport::{DataTransport, FileTransport, NoneTransport, FILE_TRANSPORT, NONE_TRANSPORT};

type Maker<T> = Box<dyn Fn(&LiveModelConfig) -> Result<Box<T>> + Send + Sync>;

/// Registry of constructors for one kind of collaborator.
pub struct Factory<T: ?Sized> {
    kind: &'static str,
    makers: BTreeMap<String, Maker<T>>,
}

/// Transports selected by `model_src`.
pub type TransportFactory = Factory<dyn DataTransport>;

/// Models selected by `model_implementation`.
pub type ModelFactory = Factory<dyn ScoringModel>;

impl<T: ?Sized> Factory<T> {
    /// Empty registry; `kind` names the collaborator in error messages.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            makers: BTreeMap::new(),
        }
    }

    /// Register `maker` under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, maker: F)
    where
        F: Fn(&LiveModelConfig) -> Result<Box<T>> + Send + Sync + 'static,
    {
        self.makers.insert(name.into(), Box::new(maker));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.makers.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.makers.keys().map(String::as_str)
    }

    /// Construct the implementation registered under `name`.
    pub fn create(&self, name: &str, config: &LiveModelConfig) -> Result<Box<T>> {
        let maker = self
            .makers
            .get(name)
            .ok_or_else(|| LiveModelError::UnknownImplementation {
                kind: self.kind,
                name: name.to_string(),
            })?;
        maker(config)
    }
}

impl<T: ?Sized> fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("kind", &self.kind)
            .field("names", &self.makers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Built-in transports: `NONE` and `FILE`.
pub fn default_transports() -> TransportFactory {
    let mut factory = TransportFactory::new("transport");
    factory.register(NONE_TRANSPORT, |_: &LiveModelConfig| -> Result<Box<dyn DataTransport>> {
        Ok(Box::new(NoneTransport))
    });
    factory.register(FILE_TRANSPORT, |config: &LiveModelConfig| -> Result<Box<dyn DataTransport>> {
        Ok(Box::new(FileTransport::from_config(config)?))
    });
    factory
}

/// Built-in models: `TABLE`, counting actions with `resolver`.
pub fn default_models(resolver: Arc<dyn ActionCountResolver>) -> ModelFactory {
    let mut factory = ModelFactory::new("model");
    factory.register(TABLE_MODEL, move |_: &LiveModelConfig| -> Result<Box<dyn ScoringModel>> {
        Ok(Box::new(TableModel::new(Arc::clone(&resolver))))
    });
    factory
}
