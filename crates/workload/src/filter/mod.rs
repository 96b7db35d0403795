//! Filter pipeline applied to every candidate before dispatch.
//!
//! A chain is an ordered list of stages. Each stage is awaited to completion
//! before the next one starts, and any stage may drop the candidate, which
//! ends the tick without sending anything.

mod expand;
mod stages;

pub use expand::{expand_braces, ExpandUrl};
pub use stages::{WorkdayBias, WorkingHours, DEFAULT_WEEKEND_ODDS};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::template::CandidateRequest;

/// Decision returned by a filter stage.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// Continue with the candidate unchanged.
    Proceed,
    /// Continue with a replacement candidate.
    Replace(CandidateRequest),
    /// Drop the candidate silently.
    Drop,
}

/// A single step of the filter pipeline.
///
/// Stages hold only their own configuration; they must not carry state from
/// one request to the next.
#[async_trait]
pub trait FilterStage: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Decide what happens to `candidate`. May suspend before resolving.
    async fn evaluate(&self, candidate: &CandidateRequest) -> FilterOutcome;
}

/// Stage that always proceeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl FilterStage for PassThrough {
    fn name(&self) -> &str {
        "pass_through"
    }

    async fn evaluate(&self, _candidate: &CandidateRequest) -> FilterOutcome {
        FilterOutcome::Proceed
    }
}

/// Ordered sequence of filter stages.
#[derive(Clone, Default)]
pub struct FilterChain {
    stages: Vec<Arc<dyn FilterStage>>,
}

impl FilterChain {
    pub fn new(stages: Vec<Arc<dyn FilterStage>>) -> Self {
        Self { stages }
    }

    /// Chain used when nothing is configured: one pass-through stage.
    pub fn pass_through() -> Self {
        Self::new(vec![Arc::new(PassThrough)])
    }

    /// Append a stage to the end of the chain.
    pub fn push(&mut self, stage: Arc<dyn FilterStage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the candidate through every stage in order.
    ///
    /// Returns `None` when a stage drops it.
    #[instrument(name = "filter_chain", skip_all, fields(url = %candidate.url))]
    pub async fn evaluate(&self, mut candidate: CandidateRequest) -> Option<CandidateRequest> {
        for stage in &self.stages {
            match stage.evaluate(&candidate).await {
                FilterOutcome::Proceed => {}
                FilterOutcome::Replace(replacement) => candidate = replacement,
                FilterOutcome::Drop => {
                    debug!(stage = stage.name(), url = %candidate.url, "Candidate dropped");
                    return None;
                }
            }
        }
        Some(candidate)
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::RequestTemplate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    fn candidate(url: &str) -> CandidateRequest {
        CandidateRequest::from_template(&RequestTemplate::get(url), Instant::now())
    }

    /// Returns a fixed outcome and records every URL it sees.
    struct Scripted {
        outcome: FilterOutcome,
        seen: Arc<Mutex<Vec<String>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(outcome: FilterOutcome) -> Self {
            Self {
                outcome,
                seen: Arc::new(Mutex::new(Vec::new())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl FilterStage for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn evaluate(&self, candidate: &CandidateRequest) -> FilterOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(candidate.url.clone());
            self.outcome.clone()
        }
    }

    #[tokio::test]
    async fn test_empty_chain_passes_original() {
        let chain = FilterChain::default();
        let original = candidate("http://a.test/");
        let result = chain.evaluate(original.clone()).await;
        assert_eq!(result, Some(original));
    }

    #[tokio::test]
    async fn test_default_chain_passes_original() {
        let chain = FilterChain::pass_through();
        assert_eq!(chain.len(), 1);
        let original = candidate("http://a.test/");
        assert_eq!(chain.evaluate(original.clone()).await, Some(original));
    }

    #[tokio::test]
    async fn test_drop_short_circuits() {
        let first = Scripted::new(FilterOutcome::Drop);
        let second = Scripted::new(FilterOutcome::Proceed);
        let second_calls = second.calls.clone();

        let chain = FilterChain::new(vec![Arc::new(first), Arc::new(second)]);
        assert_eq!(chain.evaluate(candidate("http://a.test/")).await, None);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_replacement_reaches_next_stage() {
        let original = candidate("http://a.test/");
        let replacement = original.with_url("http://b.test/");

        let first = Scripted::new(FilterOutcome::Replace(replacement.clone()));
        let second = Scripted::new(FilterOutcome::Proceed);
        let seen = second.seen.clone();

        let chain = FilterChain::new(vec![Arc::new(first), Arc::new(second)]);
        let result = chain.evaluate(original).await;

        assert_eq!(result, Some(replacement));
        assert_eq!(*seen.lock().unwrap(), vec!["http://b.test/".to_string()]);
    }

    /// Sleeps before proceeding and records start/finish order.
    struct Slow {
        label: &'static str,
        delay: Duration,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl FilterStage for Slow {
        fn name(&self) -> &str {
            self.label
        }

        async fn evaluate(&self, _candidate: &CandidateRequest) -> FilterOutcome {
            self.log.lock().unwrap().push(format!("start {}", self.label));
            tokio::time::sleep(self.delay).await;
            self.log.lock().unwrap().push(format!("end {}", self.label));
            FilterOutcome::Proceed
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stages_run_sequentially() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(vec![
            Arc::new(Slow {
                label: "one",
                delay: Duration::from_millis(50),
                log: log.clone(),
            }),
            Arc::new(Slow {
                label: "two",
                delay: Duration::from_millis(1),
                log: log.clone(),
            }),
        ]);

        assert!(chain.evaluate(candidate("http://a.test/")).await.is_some());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start one", "end one", "start two", "end two"]
        );
    }
}
