//! Synthetic HTTP traffic generation.
//!
//! This crate provides tools to:
//! - Pick request templates at random, weighted per template
//! - Fire requests at a fixed rate through a chain of filters that may
//!   drop, delay or rewrite each one
//! - Collect response-time statistics while requests are in flight
//! - Report results as a console table or JSON

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filter;
pub mod random;
pub mod report;
pub mod scheduler;
pub mod selector;
pub mod stats;
pub mod template;
pub mod transport;
pub mod workload;

pub use config::{FilterSpec, ScenarioConfig};
pub use dispatcher::Dispatcher;
pub use error::{Result, TransportError, WorkloadError};
pub use events::{Visit, VisitError, WorkloadEvent};
pub use filter::{FilterChain, FilterOutcome, FilterStage};
pub use random::{Clock, FixedClock, RandomSource, SystemClock};
pub use report::ResultsReport;
pub use scheduler::{tick_interval, Scheduler, SchedulerHandle};
pub use selector::WeightedSelector;
pub use stats::{StatsCollector, Summary};
pub use template::{CandidateRequest, Headers, OutboundRequest, RequestTemplate};
pub use transport::{ReqwestTransport, ResponseMeta, Transport, TransportResponse};
pub use workload::{EventStream, Workload, WorkloadOptions, WorkloadState};
