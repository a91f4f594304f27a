//! # Application State Management
//!
//! State shared by every HTTP handler and every recording connection.
//!
//! ## What is shared and what is not:
//! - **Shared**: configuration, request/recording metrics, and the two external
//!   collaborators (pinning client, metadata store). Both collaborators are
//!   pooled and stateless per request, so sessions use them concurrently.
//! - **Not shared**: anything about an individual recording. Each connection's
//!   actor owns its session, sink and timer outright.
//! - **Shutdown**: a cancellation token every recording actor watches, and the
//!   set of finalization tasks still uploading, which shutdown waits for.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Many handlers and actors hold a reference to the same data
//! - **RwLock**: Many readers or one writer at a time
//! - **Arc<dyn Trait>**: Collaborators are trait objects so tests can swap them out

use crate::config::AppConfig;
use crate::identity::IdentityProvider;
use crate::pinning::PinningBackend;
use crate::recording::pipeline::FinalizationPipeline;
use crate::store::MetadataStore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub pinning: Arc<dyn PinningBackend>,
    pub store: Arc<dyn MetadataStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub shutdown: CancellationToken,
    pub finalizations: FinalizationTasks,
    pub start_time: Instant,
}

/// Finalization pipelines in flight.
///
/// Tasks run on the runtime that built the state (the main runtime in
/// production), not on the HTTP worker that spawned them, so stopping the
/// workers does not drop an upload halfway through.
#[derive(Clone)]
pub struct FinalizationTasks {
    tracker: TaskTracker,
    runtime: Option<Handle>,
}

impl FinalizationTasks {
    fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.runtime {
            Some(runtime) => {
                self.tracker.spawn_on(task, runtime);
            }
            None => {
                self.tracker.spawn(task);
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `timeout` for every running finalization to finish.
    /// Returns false if some were still running when the time ran out.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        self.tracker.reopen();
        drained
    }
}

/// Counters collected across HTTP requests and recording sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,

    /// Recording connections currently open
    pub active_sessions: u32,

    /// Sessions whose artifact was pinned and recorded
    pub completed_recordings: u64,

    /// Sessions whose upload or metadata write failed
    pub failed_recordings: u64,

    /// Total audio bytes captured into artifacts
    pub recorded_bytes: u64,

    /// Key: route pattern (e.g. "GET /api/v1/uploads/latest")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        pinning: Arc<dyn PinningBackend>,
        store: Arc<dyn MetadataStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            pinning,
            store,
            identity,
            shutdown: CancellationToken::new(),
            finalizations: FinalizationTasks::new(),
            start_time: Instant::now(),
        }
    }

    /// Ask every open recording to finalize what it has captured.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately. A poisoned lock still holds a
    /// valid config, so we read through the poison instead of panicking.
    pub fn get_config(&self) -> AppConfig {
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// A pipeline bound to the shared collaborators.
    pub fn pipeline(&self) -> FinalizationPipeline {
        FinalizationPipeline::new(self.pinning.clone(), self.store.clone())
    }

    fn with_metrics<F: FnOnce(&mut AppMetrics)>(&self, update: F) {
        let mut metrics = match self.metrics.write() {
            Ok(metrics) => metrics,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut metrics);
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    pub fn increment_active_sessions(&self) {
        self.with_metrics(|m| m.active_sessions += 1);
    }

    /// Saturates at zero.
    pub fn decrement_active_sessions(&self) {
        self.with_metrics(|m| m.active_sessions = m.active_sessions.saturating_sub(1));
    }

    /// Record the outcome of one session's finalization.
    pub fn record_finalization(&self, succeeded: bool, bytes: u64) {
        self.with_metrics(|m| {
            if succeeded {
                m.completed_recordings += 1;
            } else {
                m.failed_recordings += 1;
            }
            m.recorded_bytes += bytes;
        });
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        match self.metrics.read() {
            Ok(metrics) => metrics.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// 0.0 (no errors) to 1.0 (every request failed).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
