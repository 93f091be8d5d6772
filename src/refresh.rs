//! Background model refresh.
//!
//! # Architecture
//!
//! ```text
//! RefreshTask
//!   ├── runtime: tokio (1 worker, threads "{prefix}-refresh-NNNN")
//!   ├── cancel: CancellationToken
//!   └── tracker: TaskTracker
//!         └── refresh_loop: interval.tick() ─► spawn_blocking(run_iteration)
//!
//! ModelDownloader::run_iteration
//!   transport.fetch() ──Err──► error callback (Transport)
//!        │ empty ─────────────► nothing to do
//!        ▼
//!   handle.apply_update() ──Err──► error callback (ModelUpdate)
//!        ▼
//!   new model published
//! ```
//!
//! A failed iteration never stops the loop; the next tick tries again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{ErrorCallback, LiveModelError, Result};
use crate::metrics::LiveModelMetrics;
use crate::model::ModelHandle;
use crate::transport::DataTransport;

/// How long `shutdown` waits for an in-flight fetch before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// What one refresh iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The transport had nothing new.
    Unchanged,
    /// A new model was published with this version.
    Updated(u64),
    /// The iteration failed and the error was reported.
    Failed,
}

/// Fetches model bytes and publishes them to a [`ModelHandle`].
pub struct ModelDownloader {
    transport: Box<dyn DataTransport>,
    handle: Arc<ModelHandle>,
    error_callback: Arc<dyn ErrorCallback>,
    metrics: LiveModelMetrics,
}

impl ModelDownloader {
    pub fn new(
        transport: Box<dyn DataTransport>,
        handle: Arc<ModelHandle>,
        error_callback: Arc<dyn ErrorCallback>,
        metrics: LiveModelMetrics,
    ) -> Self {
        Self {
            transport,
            handle,
            error_callback,
            metrics,
        }
    }

    pub fn handle(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    /// Fetch once and publish, returning the new version if a model was swapped in.
    ///
    /// Errors are returned to the caller and not reported to the callback.
    pub fn try_iteration(&self) -> Result<Option<u64>> {
        self.metrics.refresh_iterations.inc();

        let data = self.transport.fetch().map_err(|e| {
            self.metrics.transport_failures.inc();
            match e {
                LiveModelError::Transport(_) => e,
                other => LiveModelError::Transport(other.to_string()),
            }
        })?;

        if data.is_empty() {
            debug!("no new model data");
            return Ok(None);
        }

        let version = self.handle.apply_update(&data).map_err(|e| {
            self.metrics.model_update_failures.inc();
            e
        })?;

        self.metrics.record_model_update(version);
        info!(
            version,
            refresh_count = data.refresh_count(),
            bytes = data.data().len(),
            "model updated"
        );
        Ok(Some(version))
    }

    /// One background iteration. Failures go to the error callback.
    pub fn run_iteration(&self) -> RefreshOutcome {
        match self.try_iteration() {
            Ok(Some(version)) => RefreshOutcome::Updated(version),
            Ok(None) => RefreshOutcome::Unchanged,
            Err(e) => {
                warn!(kind = ?e.kind(), %e, "model refresh failed");
                self.error_callback.report_error(&e);
                RefreshOutcome::Failed
            }
        }
    }
}

impl std::fmt::Debug for ModelDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDownloader")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Periodic refresh running on its own small runtime.
///
/// The first iteration runs immediately after `start`.
pub struct RefreshTask {
    runtime: Option<tokio::runtime::Runtime>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl RefreshTask {
    /// Build the refresh runtime and start ticking every `period`.
    pub fn start(downloader: Arc<ModelDownloader>, period: Duration, prefix: &str) -> Result<Self> {
        let period = period.max(Duration::from_millis(1));
        let thread_counter = Arc::new(AtomicUsize::new(0));
        let name_prefix: Arc<str> = Arc::from(prefix);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name_fn(move || {
                let id = thread_counter.fetch_add(1, Ordering::SeqCst);
                format!("{}-refresh-{:04}", name_prefix, id)
            })
            .enable_time()
            .build()?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn_on(
            refresh_loop(downloader, period, cancel.clone()),
            runtime.handle(),
        );
        tracker.close();

        info!(prefix, period_ms = period.as_millis() as u64, "refresh task started");
        Ok(Self {
            runtime: Some(runtime),
            cancel,
            tracker,
        })
    }

    /// Whether the refresh loop is still alive.
    pub fn is_running(&self) -> bool {
        !self.tracker.is_empty()
    }

    /// Stop future ticks and tear down the runtime.
    ///
    /// Waits briefly for an in-flight fetch when called from a plain thread;
    /// inside an async context the runtime is released in the background.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(runtime) = self.runtime.take() {
            if tokio::runtime::Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            }
            debug!("refresh task stopped");
        }
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RefreshTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTask")
            .field("running", &self.is_running())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

async fn refresh_loop(downloader: Arc<ModelDownloader>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let iteration = {
            let downloader = Arc::clone(&downloader);
            tokio::task::spawn_blocking(move || downloader.run_iteration())
        };

        tokio::select! {
            // an abandoned fetch finishes on its own; it can only publish a complete model
            _ = cancel.cancelled() => break,
            joined = iteration => match joined {
                Ok(outcome) => debug!(?outcome, "refresh iteration finished"),
                Err(e) => warn!(%e, "refresh iteration panicked"),
            },
        }
    }
    debug!("refresh loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::TableModel;
    use crate::transport::ModelData;
    use parking_lot::Mutex;
    use std::time::Instant;

    const GOOD_MODEL: &str = r#"{"id":"m1","epsilon":0.1,"scores":[1.0,0.0]}"#;

    fn handle() -> Arc<ModelHandle> {
        Arc::new(ModelHandle::new(Box::new(TableModel::default())))
    }

    fn recording_callback() -> (Arc<Mutex<Vec<ErrorKind>>>, Arc<dyn ErrorCallback>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Arc<dyn ErrorCallback> =
            Arc::new(move |e: &LiveModelError| sink.lock().push(e.kind()));
        (seen, callback)
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_iteration_publishes_model() {
        let handle = handle();
        let (errors, callback) = recording_callback();
        let metrics = LiveModelMetrics::new();
        let downloader = ModelDownloader::new(
            Box::new(|| -> Result<ModelData> { Ok(ModelData::new(GOOD_MODEL.as_bytes().to_vec())) }),
            Arc::clone(&handle),
            callback,
            metrics.clone(),
        );

        assert_eq!(downloader.run_iteration(), RefreshOutcome::Updated(1));
        assert!(handle.is_loaded());
        assert_eq!(handle.current().unwrap().model_id(), "m1");
        assert!(errors.lock().is_empty());
        assert_eq!(metrics.model_updates.get(), 1);
        assert_eq!(metrics.model_version.get(), 1);
    }

    #[test]
    fn test_empty_data_is_not_an_update() {
        let handle = handle();
        let (errors, callback) = recording_callback();
        let downloader = ModelDownloader::new(
            Box::new(crate::transport::NoneTransport),
            Arc::clone(&handle),
            callback,
            LiveModelMetrics::new(),
        );

        assert_eq!(downloader.run_iteration(), RefreshOutcome::Unchanged);
        assert!(!handle.is_loaded());
        assert!(errors.lock().is_empty());
    }

    #[test]
    fn test_three_failing_ticks_keep_previous_model() {
        let handle = handle();
        handle
            .apply_update(&ModelData::new(GOOD_MODEL.as_bytes().to_vec()))
            .unwrap();

        let (errors, callback) = recording_callback();
        let metrics = LiveModelMetrics::new();
        let downloader = ModelDownloader::new(
            Box::new(|| -> Result<ModelData> {
                Err(LiveModelError::Transport("connection refused".into()))
            }),
            Arc::clone(&handle),
            callback,
            metrics.clone(),
        );

        for _ in 0..3 {
            assert_eq!(downloader.run_iteration(), RefreshOutcome::Failed);
        }

        assert_eq!(*errors.lock(), vec![ErrorKind::Transport; 3]);
        assert_eq!(metrics.transport_failures.get(), 3);
        assert_eq!(handle.version(), 1);
        assert_eq!(handle.current().unwrap().model_id(), "m1");
    }

    #[test]
    fn test_bad_bytes_report_model_update_error() {
        let handle = handle();
        let (errors, callback) = recording_callback();
        let metrics = LiveModelMetrics::new();
        let downloader = ModelDownloader::new(
            Box::new(|| -> Result<ModelData> { Ok(ModelData::new(b"garbage".to_vec())) }),
            Arc::clone(&handle),
            callback,
            metrics.clone(),
        );

        assert_eq!(downloader.run_iteration(), RefreshOutcome::Failed);
        assert_eq!(*errors.lock(), vec![ErrorKind::ModelUpdate]);
        assert_eq!(metrics.model_update_failures.get(), 1);
        assert!(!handle.is_loaded());
    }

    #[test]
    fn test_non_transport_fetch_error_is_reported_as_transport() {
        let (errors, callback) = recording_callback();
        let downloader = ModelDownloader::new(
            Box::new(|| -> Result<ModelData> { Err(LiveModelError::InvalidArgument("bad".into())) }),
            handle(),
            callback,
            LiveModelMetrics::new(),
        );
        let err = downloader.try_iteration().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        // try_iteration leaves reporting to the caller
        assert!(errors.lock().is_empty());
    }

    #[test]
    fn test_refresh_task_ticks_until_shutdown() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let thread_names = Arc::new(Mutex::new(Vec::new()));

        let transport = {
            let fetches = Arc::clone(&fetches);
            let thread_names = Arc::clone(&thread_names);
            move || -> Result<ModelData> {
                fetches.fetch_add(1, Ordering::SeqCst);
                thread_names
                    .lock()
                    .push(std::thread::current().name().unwrap_or_default().to_string());
                Ok(ModelData::new(GOOD_MODEL.as_bytes().to_vec()))
            }
        };

        let handle = handle();
        let (_, callback) = recording_callback();
        let downloader = Arc::new(ModelDownloader::new(
            Box::new(transport),
            Arc::clone(&handle),
            callback,
            LiveModelMetrics::new(),
        ));

        let mut task = RefreshTask::start(downloader, Duration::from_millis(10), "test").unwrap();
        assert!(wait_until(Duration::from_secs(5), || handle.version() >= 3));
        assert!(handle.is_loaded());
        assert!(fetches.load(Ordering::SeqCst) >= 3);

        task.shutdown();
        let after_shutdown = fetches.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fetches.load(Ordering::SeqCst), after_shutdown);

        assert!(thread_names
            .lock()
            .iter()
            .all(|name| name.starts_with("test-refresh-")));
    }

    #[tokio::test]
    async fn test_drop_inside_async_context() {
        let downloader = Arc::new(ModelDownloader::new(
            Box::new(crate::transport::NoneTransport),
            handle(),
            Arc::new(crate::error::TracingErrorCallback),
            LiveModelMetrics::new(),
        ));
        let task = RefreshTask::start(downloader, Duration::from_millis(10), "async").unwrap();
        drop(task);
    }
}
