use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use getset::CopyGetters;

use crate::{ConvoyError, ConvoyResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The failure history of one image name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct BackoffRecord {
    /// Consecutive failures since the last success.
    failure_count: u32,

    /// When the most recent failure happened.
    last_failure: Instant,
}

/// Per-image-name fetch failure tracking.
///
/// The delay before another attempt is `min(2^failures * increment, poll_interval)`. Records live
/// for the lifetime of the process and are never persisted.
#[derive(Debug)]
pub struct BackoffTracker {
    increment: Duration,
    records: Mutex<HashMap<String, BackoffRecord>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BackoffTracker {
    /// Creates an empty tracker with the given base increment.
    pub fn new(increment: Duration) -> Self {
        Self {
            increment,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure now.
    pub fn record_failure(&self, name: &str) {
        self.record_failure_at(name, Instant::now());
    }

    /// Records a failure at the given instant.
    pub fn record_failure_at(&self, name: &str, at: Instant) {
        let mut records = self.lock();
        let failure_count = records
            .get(name)
            .map_or(1, |r| r.failure_count.saturating_add(1));
        records.insert(
            name.to_string(),
            BackoffRecord {
                failure_count,
                last_failure: at,
            },
        );
    }

    /// Forgets the failure history of an image.
    pub fn clear(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Returns the failure history of an image, if any.
    pub fn get(&self, name: &str) -> Option<BackoffRecord> {
        self.lock().get(name).copied()
    }

    /// The minimum time to wait after the last failure before trying again.
    pub fn delay(&self, name: &str, poll_interval: Duration) -> Duration {
        match self.get(name) {
            Some(record) => self.delay_for(record.failure_count, poll_interval),
            None => Duration::ZERO,
        }
    }

    /// Fails with [`ConvoyError::ImageDownloadBackoff`] if the image is inside its backoff window.
    pub fn check(&self, name: &str, poll_interval: Duration) -> ConvoyResult<()> {
        self.check_at(name, poll_interval, Instant::now())
    }

    /// Like [`BackoffTracker::check`], evaluated at the given instant.
    pub fn check_at(&self, name: &str, poll_interval: Duration, now: Instant) -> ConvoyResult<()> {
        let Some(record) = self.get(name) else {
            return Ok(());
        };

        let elapsed = now.saturating_duration_since(record.last_failure);
        if elapsed < self.delay_for(record.failure_count, poll_interval) {
            return Err(ConvoyError::ImageDownloadBackoff);
        }

        Ok(())
    }

    fn delay_for(&self, failure_count: u32, poll_interval: Duration) -> Duration {
        2u32.checked_pow(failure_count)
            .and_then(|factor| self.increment.checked_mul(factor))
            .map_or(poll_interval, |delay| delay.min(poll_interval))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BackoffRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
