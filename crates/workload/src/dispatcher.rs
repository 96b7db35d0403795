//! Sends candidates that survived the filter chain and reports the outcome.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, instrument, warn};

use crate::error::TransportError;
use crate::events::{Visit, VisitError, WorkloadEvent};
use crate::stats::{Outcome, StatsCollector};
use crate::template::{CandidateRequest, Headers, OutboundRequest};
use crate::transport::Transport;

/// `user-agent` sent unless a workload or template overrides it.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Headers every request starts from.
pub fn default_headers() -> Headers {
    [("user-agent", USER_AGENT)].into_iter().collect()
}

/// Sends requests through a transport, timing each one.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    /// Built-in defaults with workload headers already layered on top.
    base_headers: Headers,
    stats: Arc<StatsCollector>,
    events: UnboundedSender<WorkloadEvent>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        defaults: Headers,
        workload_headers: &Headers,
        stats: Arc<StatsCollector>,
        events: UnboundedSender<WorkloadEvent>,
    ) -> Self {
        Self {
            transport,
            base_headers: defaults.merged_with(workload_headers),
            stats,
            events,
        }
    }

    /// Resolve the request the transport will see.
    ///
    /// Header precedence: defaults, then workload headers, then the
    /// candidate's own headers.
    pub fn prepare(&self, candidate: &CandidateRequest) -> OutboundRequest {
        OutboundRequest {
            method: candidate.method.clone(),
            url: candidate.url.clone(),
            headers: self.base_headers.merged_with(&candidate.headers),
            body: candidate.body.clone(),
        }
    }

    /// Send the candidate, record its elapsed time and emit an event.
    ///
    /// Elapsed time is measured from the tick that created the candidate, so
    /// it includes time spent in the filter chain. It is recorded whether or
    /// not the request succeeded.
    #[instrument(skip_all, fields(method = %candidate.method, url = %candidate.url))]
    pub async fn dispatch(&self, candidate: CandidateRequest) -> Result<Visit, TransportError> {
        let request = self.prepare(&candidate);
        let result = self.transport.send(&request).await;
        let elapsed = candidate.start.elapsed();

        match result {
            Ok(response) => {
                self.stats.record(elapsed, Outcome::Success);
                debug!(
                    url = %request.url,
                    status = response.meta.status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Visit completed"
                );
                let visit = Visit {
                    request,
                    response: response.meta,
                    body: response.body,
                };
                self.emit(WorkloadEvent::Visit(visit.clone()));
                Ok(visit)
            }
            Err(error) => {
                self.stats.record(elapsed, Outcome::Failure);
                warn!(url = %request.url, error = %error, "Request failed");
                self.emit(WorkloadEvent::Error(VisitError {
                    request,
                    error: error.clone(),
                }));
                Err(error)
            }
        }
    }

    fn emit(&self, event: WorkloadEvent) {
        // Nobody listening is fine; events are informational.
        let _ = self.events.send(event);
    }
}
