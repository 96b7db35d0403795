//! Time-of-week filters that shape traffic like a human workforce.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};

use super::{FilterOutcome, FilterStage};
use crate::error::{Result, WorkloadError};
use crate::random::{Clock, RandomSource, SystemClock};
use crate::template::CandidateRequest;

/// Weekend traffic is reduced to this share of weekday traffic by default.
pub const DEFAULT_WEEKEND_ODDS: f64 = 0.2;

fn is_weekend(time: &NaiveDateTime) -> bool {
    matches!(time.weekday(), Weekday::Sat | Weekday::Sun)
}

fn check_odds(odds: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&odds) {
        Ok(odds)
    } else {
        Err(WorkloadError::invalid_filter(format!(
            "odds must be within 0..=1, got {}",
            odds
        )))
    }
}

/// Always proceeds on weekdays; on weekends proceeds with `weekend_odds`.
pub struct WorkdayBias {
    weekend_odds: f64,
    rng: RandomSource,
    clock: Arc<dyn Clock>,
}

impl WorkdayBias {
    pub fn new(rng: RandomSource) -> Self {
        Self {
            weekend_odds: DEFAULT_WEEKEND_ODDS,
            rng,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_weekend_odds(mut self, odds: f64) -> Result<Self> {
        self.weekend_odds = check_odds(odds)?;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl FilterStage for WorkdayBias {
    fn name(&self) -> &str {
        "workdays"
    }

    async fn evaluate(&self, _candidate: &CandidateRequest) -> FilterOutcome {
        if !is_weekend(&self.clock.now()) || self.rng.chance(self.weekend_odds) {
            FilterOutcome::Proceed
        } else {
            FilterOutcome::Drop
        }
    }
}

/// Lets traffic through mostly during office hours.
///
/// Before deciding, the stage waits a random jitter below `max_jitter` so
/// that requests from one tick do not all land on the same instant.
pub struct WorkingHours {
    max_jitter: Duration,
    rng: RandomSource,
    clock: Arc<dyn Clock>,
}

impl WorkingHours {
    pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(1);

    pub fn new(rng: RandomSource) -> Self {
        Self {
            max_jitter: Self::DEFAULT_MAX_JITTER,
            rng,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Probability that a request goes out at the given local time.
    pub fn odds_at(time: &NaiveDateTime) -> f64 {
        if is_weekend(time) {
            return 0.05;
        }
        match time.hour() {
            9..=16 => 1.0,
            7..=8 | 17..=18 => 0.5,
            _ => 0.05,
        }
    }
}

#[async_trait]
impl FilterStage for WorkingHours {
    fn name(&self) -> &str {
        "working_hours"
    }

    async fn evaluate(&self, _candidate: &CandidateRequest) -> FilterOutcome {
        if !self.max_jitter.is_zero() {
            let wait = self.max_jitter.mul_f64(self.rng.next_f64());
            tokio::time::sleep(wait).await;
        }

        // Read the clock after the wait, the hour may have changed
        let odds = Self::odds_at(&self.clock.now());
        if self.rng.chance(odds) {
            FilterOutcome::Proceed
        } else {
            FilterOutcome::Drop
        }
    }
}
