use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Numeric record of the calls made against one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub invocations: u64,
    pub elapsed_nanos: u64,
    pub rows: u64,
    pub bytes_down: u64,
    pub bytes_up: u64,
}

impl Stats {
    pub fn statement(elapsed: Duration, rows: u64) -> Self {
        Self {
            invocations: 1,
            elapsed_nanos: duration_nanos(elapsed),
            rows,
            ..Self::default()
        }
    }

    pub fn received(bytes: u64) -> Self {
        Self {
            invocations: 1,
            bytes_down: bytes,
            ..Self::default()
        }
    }

    pub fn sent(bytes: u64) -> Self {
        Self {
            invocations: 1,
            bytes_up: bytes,
            ..Self::default()
        }
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_nanos = duration_nanos(elapsed);
        self
    }

    /// Field-wise sum, clamped at `u64::MAX`.
    pub fn accumulate(&mut self, other: &Stats) {
        self.invocations = self.invocations.saturating_add(other.invocations);
        self.elapsed_nanos = self.elapsed_nanos.saturating_add(other.elapsed_nanos);
        self.rows = self.rows.saturating_add(other.rows);
        self.bytes_down = self.bytes_down.saturating_add(other.bytes_down);
        self.bytes_up = self.bytes_up.saturating_add(other.bytes_up);
    }

    /// Field-wise difference, clamped at zero.
    pub fn saturating_sub(&self, other: &Stats) -> Stats {
        Stats {
            invocations: self.invocations.saturating_sub(other.invocations),
            elapsed_nanos: self.elapsed_nanos.saturating_sub(other.elapsed_nanos),
            rows: self.rows.saturating_sub(other.rows),
            bytes_down: self.bytes_down.saturating_sub(other.bytes_down),
            bytes_up: self.bytes_up.saturating_sub(other.bytes_up),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Stats::default()
    }

    pub fn elapsed_time(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos)
    }
}

fn duration_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

/// Shared, lock-free counterpart of [`Stats`].
///
/// Writers add with relaxed atomics; a reader sees each field at some point
/// between concurrent updates, which is enough once the writers quiesce.
#[derive(Debug, Default)]
pub struct Accumulator {
    invocations: AtomicU64,
    elapsed_nanos: AtomicU64,
    rows: AtomicU64,
    bytes_down: AtomicU64,
    bytes_up: AtomicU64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&self, delta: &Stats) {
        add(&self.invocations, delta.invocations);
        add(&self.elapsed_nanos, delta.elapsed_nanos);
        add(&self.rows, delta.rows);
        add(&self.bytes_down, delta.bytes_down);
        add(&self.bytes_up, delta.bytes_up);
    }

    pub fn load(&self) -> Stats {
        Stats {
            invocations: self.invocations.load(Ordering::Relaxed),
            elapsed_nanos: self.elapsed_nanos.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
        }
    }
}

fn add(counter: &AtomicU64, value: u64) {
    if value != 0 {
        // The closure always returns `Some`, so the update cannot fail.
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            Some(current.saturating_add(value))
        });
    }
}
