//! Model byte transports.
//!
//! A transport is only ever called from the refresh task. It may block; the
//! refresh task runs it on a blocking thread. Timeouts are the transport's own
//! concern: any error is treated as "fetch failed, retry on the next tick".

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::LiveModelConfig;
use crate::error::{LiveModelError, Result};

/// Transport name for the no-op transport.
pub const NONE_TRANSPORT: &str = "NONE";
/// Transport name for the local file transport.
pub const FILE_TRANSPORT: &str = "FILE";
/// Property naming the model file read by the file transport.
pub const MODEL_PATH_KEY: &str = "file.model_path";

/// Bytes of a model as delivered by a transport.
///
/// Empty data means the source has not changed since the previous fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelData {
    data: Vec<u8>,
    refresh_count: u64,
}

impl ModelData {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            refresh_count: 0,
        }
    }

    /// No new bytes are available.
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn with_refresh_count(mut self, refresh_count: u64) -> Self {
        self.refresh_count = refresh_count;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// How many times the transport has delivered new bytes, including these.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count
    }
}

/// Fetches model bytes from wherever models are published.
pub trait DataTransport: Send + Sync {
    fn fetch(&self) -> Result<ModelData>;
}

impl<F> DataTransport for F
where
    F: Fn() -> Result<ModelData> + Send + Sync,
{
    fn fetch(&self) -> Result<ModelData> {
        self()
    }
}

/// Transport that never delivers a model; decisions stay in pure exploration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneTransport;

impl DataTransport for NoneTransport {
    fn fetch(&self) -> Result<ModelData> {
        Ok(ModelData::unchanged())
    }
}

/// Reads a model from a local file, delivering it again only when the file's
/// modification time or length changes.
#[derive(Debug)]
pub struct FileTransport {
    path: PathBuf,
    last_seen: Mutex<Option<(SystemTime, u64)>>,
    refresh_count: Mutex<u64>,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_seen: Mutex::new(None),
            refresh_count: Mutex::new(0),
        }
    }

    /// Build from the `file.model_path` property.
    pub fn from_config(config: &LiveModelConfig) -> Result<Self> {
        let path = config.get(MODEL_PATH_KEY, "");
        if path.is_empty() {
            return Err(LiveModelError::InvalidArgument(format!(
                "{FILE_TRANSPORT} transport requires the `{MODEL_PATH_KEY}` property"
            )));
        }
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl DataTransport for FileTransport {
    fn fetch(&self) -> Result<ModelData> {
        let metadata = fs::metadata(&self.path).map_err(|e| {
            LiveModelError::Transport(format!("cannot stat {}: {e}", self.path.display()))
        })?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let stamp = (modified, metadata.len());

        let mut last_seen = self.last_seen.lock();
        if *last_seen == Some(stamp) {
            debug!(path = %self.path.display(), "model file unchanged");
            return Ok(ModelData::unchanged());
        }

        let bytes = fs::read(&self.path).map_err(|e| {
            LiveModelError::Transport(format!("cannot read {}: {e}", self.path.display()))
        })?;
        *last_seen = Some(stamp);

        let mut refresh_count = self.refresh_count.lock();
        *refresh_count += 1;
        Ok(ModelData::new(bytes).with_refresh_count(*refresh_count))
    }
}
