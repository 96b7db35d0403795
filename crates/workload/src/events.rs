//! Events emitted to the single consumer of a running workload.

use bytes::Bytes;

use crate::error::TransportError;
use crate::template::OutboundRequest;
use crate::transport::ResponseMeta;

/// A request that completed with a response.
#[derive(Debug, Clone)]
pub struct Visit {
    pub request: OutboundRequest,
    pub response: ResponseMeta,
    pub body: Bytes,
}

/// A request the transport failed to complete.
#[derive(Debug, Clone)]
pub struct VisitError {
    pub request: OutboundRequest,
    pub error: TransportError,
}

/// Outcome of one dispatched request.
#[derive(Debug, Clone)]
pub enum WorkloadEvent {
    Visit(Visit),
    Error(VisitError),
}

impl WorkloadEvent {
    pub fn request(&self) -> &OutboundRequest {
        match self {
            WorkloadEvent::Visit(visit) => &visit.request,
            WorkloadEvent::Error(err) => &err.request,
        }
    }

    pub fn is_visit(&self) -> bool {
        matches!(self, WorkloadEvent::Visit(_))
    }
}
