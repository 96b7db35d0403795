//! The orchestrator wiring selector, filters, dispatcher and statistics.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;

use crate::dispatcher::{default_headers, Dispatcher};
use crate::error::{Result, WorkloadError};
use crate::events::WorkloadEvent;
use crate::filter::{FilterChain, FilterStage};
use crate::random::RandomSource;
use crate::scheduler::{tick_interval, Scheduler, SchedulerHandle, DEFAULT_MAX_PER_MINUTE};
use crate::stats::{StatsCollector, Summary};
use crate::template::{Headers, RequestTemplate};
use crate::transport::Transport;

/// Receiving end of a workload's visit/error events.
///
/// The channel is unbounded and every visit carries its response body, so a
/// receiver that is kept but never read grows for the whole run. Drop it if
/// events are not consumed.
pub type EventStream = UnboundedReceiver<WorkloadEvent>;

/// Everything needed to start a workload.
#[derive(Clone)]
pub struct WorkloadOptions {
    requests: Vec<RequestTemplate>,
    max: u32,
    filters: Option<FilterChain>,
    filter: Option<Arc<dyn FilterStage>>,
    headers: Headers,
    default_headers: Headers,
    rng: RandomSource,
}

impl WorkloadOptions {
    pub fn new(requests: Vec<RequestTemplate>) -> Self {
        Self {
            requests,
            max: DEFAULT_MAX_PER_MINUTE,
            filters: None,
            filter: None,
            headers: Headers::new(),
            default_headers: default_headers(),
            rng: RandomSource::default(),
        }
    }

    /// Target requests per minute.
    pub fn max(mut self, max: u32) -> Self {
        self.max = max;
        self
    }

    /// Ordered filter chain. Takes precedence over [`filter`](Self::filter).
    pub fn filters(mut self, chain: FilterChain) -> Self {
        self.filters = Some(chain);
        self
    }

    /// Single-stage chain, used when no chain was set with `filters`.
    pub fn filter(mut self, stage: Arc<dyn FilterStage>) -> Self {
        self.filter = Some(stage);
        self
    }

    /// Headers sent with every request unless a template overrides them.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the built-in headers that sit under the workload headers.
    pub fn default_headers(mut self, headers: Headers) -> Self {
        self.default_headers = headers;
        self
    }

    /// Random source for template selection.
    pub fn rng(mut self, rng: RandomSource) -> Self {
        self.rng = rng;
        self
    }

    /// The chain a workload built from these options will run.
    pub fn filter_chain(&self) -> FilterChain {
        match (&self.filters, &self.filter) {
            (Some(chain), _) => chain.clone(),
            (None, Some(stage)) => FilterChain::new(vec![stage.clone()]),
            (None, None) => FilterChain::pass_through(),
        }
    }

    pub fn interval(&self) -> Result<Duration> {
        tick_interval(self.max)
    }
}

/// Lifecycle of a workload. There is no idle state: a workload is running
/// from the moment [`Workload::new`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    Running,
    Stopped,
}

/// A running stream of synthetic traffic.
///
/// The tick source starts as soon as the workload is constructed and keeps
/// going until [`stop`](Self::stop) is called or the workload is dropped.
pub struct Workload {
    scheduler: SchedulerHandle,
    stats: Arc<StatsCollector>,
    interval: Duration,
}

impl Workload {
    /// Validate `options` and start ticking.
    ///
    /// Configuration errors are returned here, before any tick happens. Must
    /// be called from within a Tokio runtime. Drop the returned
    /// [`EventStream`] if events are not consumed; statistics are recorded
    /// either way.
    pub fn new(options: WorkloadOptions, transport: Arc<dyn Transport>) -> Result<(Self, EventStream)> {
        let runtime = Handle::try_current().map_err(|_| WorkloadError::NoRuntime)?;
        let interval = options.interval()?;
        let chain = Arc::new(options.filter_chain());

        let stats = Arc::new(StatsCollector::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(
            transport,
            options.default_headers,
            &options.headers,
            stats.clone(),
            tx,
        ));

        let scheduler = Scheduler::new(interval, options.requests, chain, dispatcher, options.rng)?;

        info!(
            max_per_minute = options.max,
            interval_ms = interval.as_millis() as u64,
            "Starting workload"
        );

        let workload = Self {
            scheduler: scheduler.spawn(&runtime),
            stats,
            interval,
        };
        Ok((workload, rx))
    }

    pub fn state(&self) -> WorkloadState {
        if self.scheduler.is_stopped() {
            WorkloadState::Stopped
        } else {
            WorkloadState::Running
        }
    }

    /// Time between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Requests currently between their tick and their response.
    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    /// Statistics over everything recorded so far.
    pub fn summary(&self) -> Summary {
        self.stats.summarize()
    }

    /// Stop ticking and return the statistics recorded so far.
    ///
    /// Requests already past the filter chain keep running and still emit
    /// events and record timings; use [`drain`](Self::drain) to wait for
    /// them. Calling `stop` again only recomputes the summary.
    pub fn stop(&self) -> Summary {
        if !self.scheduler.is_stopped() {
            info!("Stopping workload");
        }
        self.scheduler.stop();
        self.summary()
    }

    /// Stop ticking, wait for every in-flight request, then summarize.
    pub async fn drain(&mut self) -> Summary {
        self.scheduler.drain().await;
        self.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::filter::PassThrough;
    use crate::template::OutboundRequest;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn send(
            &self,
            _request: &OutboundRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            Err(TransportError::Connect("unreachable".to_string()))
        }
    }

    fn templates() -> Vec<RequestTemplate> {
        vec![RequestTemplate::get("http://a.test/")]
    }

    #[test]
    fn test_requires_runtime() {
        let result = Workload::new(WorkloadOptions::new(templates()), Arc::new(Unreachable));
        assert!(matches!(result, Err(WorkloadError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_configuration_errors_are_synchronous() {
        let result = Workload::new(WorkloadOptions::new(Vec::new()), Arc::new(Unreachable));
        assert!(matches!(result, Err(WorkloadError::NoTemplates)));

        let zero = vec![RequestTemplate::get("http://a.test/").with_weight(0.0)];
        let result = Workload::new(WorkloadOptions::new(zero), Arc::new(Unreachable));
        assert!(matches!(result, Err(WorkloadError::ZeroTotalWeight)));

        let result = Workload::new(WorkloadOptions::new(templates()).max(0), Arc::new(Unreachable));
        assert!(matches!(result, Err(WorkloadError::InvalidRate(0))));
    }

    #[test]
    fn test_chain_selection() {
        let options = WorkloadOptions::new(templates());
        assert_eq!(options.filter_chain().stage_names(), vec!["pass_through"]);
        assert_eq!(options.interval().unwrap(), Duration::from_secs(5));

        let options = options.filter(Arc::new(PassThrough));
        assert_eq!(options.filter_chain().len(), 1);

        let options = options.filters(FilterChain::default());
        assert!(options.filter_chain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice() {
        let (workload, _events) = Workload::new(
            WorkloadOptions::new(templates()).max(60),
            Arc::new(Unreachable),
        )
        .unwrap();
        assert_eq!(workload.state(), WorkloadState::Running);
        assert_eq!(workload.interval(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let first = workload.stop();
        assert_eq!(workload.state(), WorkloadState::Stopped);
        assert_eq!(first.failures, 2);

        let second = workload.stop();
        assert_eq!(second, first);
    }
}
