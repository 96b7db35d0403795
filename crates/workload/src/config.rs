//! Scenario configuration loading and management.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WorkloadError};
use crate::filter::{ExpandUrl, FilterChain, FilterStage, PassThrough, WorkdayBias, WorkingHours};
use crate::random::{Clock, RandomSource, SystemClock};
use crate::scheduler::{tick_interval, DEFAULT_MAX_PER_MINUTE};
use crate::selector::WeightedSelector;
use crate::template::{Headers, RequestTemplate};
use crate::workload::WorkloadOptions;

/// Scenario loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub requests: Vec<RequestTemplate>,
    /// Target requests per minute.
    #[serde(default = "default_max")]
    pub max: u32,
    /// Ordered filter stages. Empty means a single pass-through stage.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    /// Single-stage shorthand, used only when `filters` is empty.
    #[serde(default)]
    pub filter: Option<FilterSpec>,
    /// Headers applied to every request, under template headers.
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub seed: Option<u64>, // Optional RNG seed for reproducible runs
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max() -> u32 {
    DEFAULT_MAX_PER_MINUTE
}

fn default_duration_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    30
}

/// A standard filter stage by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Reduced traffic on weekends
    Workdays {
        #[serde(default)]
        weekend_odds: Option<f64>,
    },
    /// Traffic mostly during office hours
    WorkingHours {
        #[serde(default)]
        max_jitter_ms: Option<u64>,
    },
    /// Brace-expand the URL and pick one result
    Expand,
    PassThrough,
}

impl FilterSpec {
    /// Parse the short form used on the command line, e.g. `working_hours`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "workdays" => Ok(Self::Workdays { weekend_odds: None }),
            "working_hours" => Ok(Self::WorkingHours {
                max_jitter_ms: None,
            }),
            "expand" => Ok(Self::Expand),
            "pass_through" => Ok(Self::PassThrough),
            other => Err(WorkloadError::invalid_filter(format!(
                "unknown filter '{}'",
                other
            ))),
        }
    }

    /// Instantiate the stage.
    pub fn build(&self, rng: &RandomSource, clock: &Arc<dyn Clock>) -> Result<Arc<dyn FilterStage>> {
        let stage: Arc<dyn FilterStage> = match self {
            FilterSpec::Workdays { weekend_odds } => {
                let mut stage = WorkdayBias::new(rng.clone()).with_clock(clock.clone());
                if let Some(odds) = weekend_odds {
                    stage = stage.with_weekend_odds(*odds)?;
                }
                Arc::new(stage)
            }
            FilterSpec::WorkingHours { max_jitter_ms } => {
                let mut stage = WorkingHours::new(rng.clone()).with_clock(clock.clone());
                if let Some(ms) = max_jitter_ms {
                    stage = stage.with_max_jitter(Duration::from_millis(*ms));
                }
                Arc::new(stage)
            }
            FilterSpec::Expand => Arc::new(ExpandUrl::new(rng.clone())),
            FilterSpec::PassThrough => Arc::new(PassThrough),
        };
        Ok(stage)
    }
}

impl ScenarioConfig {
    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ScenarioConfig = serde_yaml::from_str(&content)?;
        debug!(name = %config.name, path = %path.as_ref().display(), "Loaded scenario");
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let weights: Vec<f64> = self.requests.iter().map(|r| r.weight).collect();
        WeightedSelector::new(&weights)?;
        tick_interval(self.max)?;
        if self.duration_secs == 0 {
            return Err(WorkloadError::InvalidScenario(
                "duration_secs must be > 0".to_string(),
            ));
        }
        // Building each stage checks its parameters
        let rng = RandomSource::seeded(0);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        for spec in self.filter_specs() {
            spec.build(&rng, &clock)?;
        }
        Ok(())
    }

    /// Stage specs in effect: `filters`, else `filter`, else none.
    pub fn filter_specs(&self) -> Vec<FilterSpec> {
        if !self.filters.is_empty() {
            self.filters.clone()
        } else {
            self.filter.iter().cloned().collect()
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Turn the scenario into workload options using the system clock.
    pub fn to_options(&self) -> Result<WorkloadOptions> {
        self.to_options_with_clock(Arc::new(SystemClock))
    }

    pub fn to_options_with_clock(&self, clock: Arc<dyn Clock>) -> Result<WorkloadOptions> {
        let rng = RandomSource::new(self.seed);
        let specs = self.filter_specs();

        let mut options = WorkloadOptions::new(self.requests.clone())
            .max(self.max)
            .headers(self.headers.clone())
            .rng(rng.clone());

        if !specs.is_empty() {
            let mut chain = FilterChain::default();
            for spec in &specs {
                chain.push(spec.build(&rng, &clock)?);
            }
            options = options.filters(chain);
        }

        Ok(options)
    }
}
