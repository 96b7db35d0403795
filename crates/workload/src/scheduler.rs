//! Periodic tick source feeding candidates into the filter pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::error::{Result, TransportError, WorkloadError};
use crate::events::Visit;
use crate::filter::FilterChain;
use crate::random::RandomSource;
use crate::selector::WeightedSelector;
use crate::template::{CandidateRequest, RequestTemplate};

/// Requests per minute when no rate is configured.
pub const DEFAULT_MAX_PER_MINUTE: u32 = 12;

/// Fixed spacing between ticks for a requests-per-minute target.
pub fn tick_interval(max_per_minute: u32) -> Result<Duration> {
    if max_per_minute == 0 {
        return Err(WorkloadError::InvalidRate(max_per_minute));
    }
    let millis = (60_000.0 / max_per_minute as f64).round() as u64;
    if millis == 0 {
        return Err(WorkloadError::InvalidRate(max_per_minute));
    }
    Ok(Duration::from_millis(millis))
}

/// Push one candidate through the filter chain and, if it survives, send it.
///
/// Returns `None` when a filter dropped the candidate.
pub async fn run_pipeline(
    chain: &FilterChain,
    dispatcher: &Dispatcher,
    candidate: CandidateRequest,
) -> Option<std::result::Result<Visit, TransportError>> {
    let candidate = chain.evaluate(candidate).await?;
    Some(dispatcher.dispatch(candidate).await)
}

/// Draws a template every interval and spawns its pipeline.
pub struct Scheduler {
    interval: Duration,
    templates: Arc<[RequestTemplate]>,
    selector: WeightedSelector,
    chain: Arc<FilterChain>,
    dispatcher: Arc<Dispatcher>,
    rng: RandomSource,
}

impl Scheduler {
    /// Build a scheduler. Fails if the templates cannot be selected from.
    pub fn new(
        interval: Duration,
        templates: Vec<RequestTemplate>,
        chain: Arc<FilterChain>,
        dispatcher: Arc<Dispatcher>,
        rng: RandomSource,
    ) -> Result<Self> {
        let weights: Vec<f64> = templates.iter().map(|t| t.weight).collect();
        let selector = WeightedSelector::new(&weights)?;
        Ok(Self {
            interval,
            templates: templates.into(),
            selector,
            chain,
            dispatcher,
            rng,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking on `runtime`. The first tick fires one interval from now.
    pub fn spawn(self, runtime: &Handle) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let ticker = runtime.spawn(self.run(cancel.clone(), tracker.clone()));

        SchedulerHandle {
            cancel,
            tracker,
            ticker,
        }
    }

    async fn run(self, cancel: CancellationToken, tracker: TaskTracker) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        // A stalled runtime should not cause a burst of catch-up requests
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            templates = self.templates.len(),
            filters = ?self.chain,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick(&tracker),
            }
        }

        info!("Scheduler stopped");
    }

    /// Draw a candidate and hand it to its own task.
    fn tick(&self, tracker: &TaskTracker) {
        let index = self.selector.select(&self.rng);
        let candidate = CandidateRequest::from_template(&self.templates[index], Instant::now());
        debug!(template = index, url = %candidate.url, "Tick");

        let chain = self.chain.clone();
        let dispatcher = self.dispatcher.clone();
        tracker.spawn(async move {
            run_pipeline(&chain, &dispatcher, candidate).await;
        });
    }
}

/// Control over a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
    ticker: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Cancel the tick source. Pipelines already spawned keep running.
    /// Calling this more than once has no further effect.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of pipelines still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop ticking and wait until every spawned pipeline has finished.
    pub async fn drain(&mut self) {
        self.stop();
        if !self.ticker.is_finished() {
            let _ = (&mut self.ticker).await;
        }
        self.tracker.wait().await;
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOutcome, FilterStage};
    use crate::stats::StatsCollector;
    use crate::template::{Headers, OutboundRequest};
    use crate::transport::{ResponseMeta, Transport, TransportResponse};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Counting {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Counting {
        async fn send(
            &self,
            _request: &OutboundRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse {
                meta: ResponseMeta {
                    status: 204,
                    headers: Headers::new(),
                },
                body: Bytes::new(),
            })
        }
    }

    struct Veto;

    #[async_trait]
    impl FilterStage for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        async fn evaluate(&self, _candidate: &CandidateRequest) -> FilterOutcome {
            FilterOutcome::Drop
        }
    }

    /// Holds each candidate for a long time before letting it through.
    struct Stall(Duration);

    #[async_trait]
    impl FilterStage for Stall {
        fn name(&self) -> &str {
            "stall"
        }

        async fn evaluate(&self, _candidate: &CandidateRequest) -> FilterOutcome {
            tokio::time::sleep(self.0).await;
            FilterOutcome::Proceed
        }
    }

    fn scheduler(
        interval: Duration,
        chain: FilterChain,
        transport: Arc<Counting>,
    ) -> (Scheduler, Arc<StatsCollector>) {
        let stats = Arc::new(StatsCollector::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(transport, Headers::new(), &Headers::new(), stats.clone(), tx);
        let scheduler = Scheduler::new(
            interval,
            vec![RequestTemplate::get("http://a.test/")],
            Arc::new(chain),
            Arc::new(dispatcher),
            RandomSource::seeded(1),
        )
        .unwrap();
        (scheduler, stats)
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(tick_interval(60).unwrap(), Duration::from_millis(1000));
        assert_eq!(
            tick_interval(DEFAULT_MAX_PER_MINUTE).unwrap(),
            Duration::from_millis(5000)
        );
        assert_eq!(tick_interval(600).unwrap(), Duration::from_millis(100));
        assert_eq!(tick_interval(7).unwrap(), Duration::from_millis(8571));
        assert!(matches!(tick_interval(0), Err(WorkloadError::InvalidRate(0))));
        assert!(tick_interval(1_000_000).is_err());
    }

    #[test]
    fn test_rejects_zero_weights() {
        let stats = Arc::new(StatsCollector::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::new(Counting::default()),
            Headers::new(),
            &Headers::new(),
            stats,
            tx,
        );
        let result = Scheduler::new(
            Duration::from_secs(1),
            vec![RequestTemplate::get("http://a.test/").with_weight(0.0)],
            Arc::new(FilterChain::default()),
            Arc::new(dispatcher),
            RandomSource::seeded(1),
        );
        assert!(matches!(result, Err(WorkloadError::ZeroTotalWeight)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_interval() {
        let transport = Arc::new(Counting::default());
        let (scheduler, _) = scheduler(
            Duration::from_millis(100),
            FilterChain::default(),
            transport.clone(),
        );
        let handle = scheduler.spawn(&Handle::current());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 3);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_veto_never_dispatches() {
        let transport = Arc::new(Counting::default());
        let (scheduler, stats) = scheduler(
            Duration::from_millis(100),
            FilterChain::new(vec![Arc::new(Veto)]),
            transport.clone(),
        );
        let handle = scheduler.spawn(&Handle::current());

        tokio::time::sleep(Duration::from_millis(550)).await;
        handle.stop();

        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
        assert!(stats.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_pipelines_do_not_delay_ticks() {
        let transport = Arc::new(Counting::default());
        let (scheduler, _) = scheduler(
            Duration::from_millis(100),
            FilterChain::new(vec![Arc::new(Stall(Duration::from_secs(1)))]),
            transport.clone(),
        );
        let handle = scheduler.spawn(&Handle::current());

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(handle.in_flight(), 4);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_finish() {
        let transport = Arc::new(Counting::default());
        let (scheduler, stats) = scheduler(
            Duration::from_millis(100),
            FilterChain::new(vec![Arc::new(Stall(Duration::from_millis(250)))]),
            transport.clone(),
        );
        let mut handle = scheduler.spawn(&Handle::current());

        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());

        // Ticks at 100ms and 200ms were spawned before the stop
        handle.drain().await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 2);
        assert_eq!(stats.len(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_pipeline_reports_drop() {
        let transport = Arc::new(Counting::default());
        let stats = Arc::new(StatsCollector::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(transport.clone(), Headers::new(), &Headers::new(), stats, tx);
        let candidate =
            CandidateRequest::from_template(&RequestTemplate::get("http://a.test/"), Instant::now());

        let dropped = run_pipeline(
            &FilterChain::new(vec![Arc::new(Veto)]),
            &dispatcher,
            candidate.clone(),
        )
        .await;
        assert!(dropped.is_none());

        let sent = run_pipeline(&FilterChain::default(), &dispatcher, candidate).await;
        assert!(matches!(sent, Some(Ok(_))));
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
    }
}
