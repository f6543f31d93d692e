//! Clock and ticker seams.
//!
//! Background work (health checks, cache sweeps) and time-based state
//! (circuit cooldowns, cache expiry) read time through [`Clock`] and wait
//! through [`Ticker`], so tests can drive both by hand.
//!
//! | Type | Use |
//! |------|-----|
//! | [`SystemClock`] | Production time source |
//! | [`ManualClock`] | Test clock advanced explicitly |
//! | [`IntervalTicker`] | Production periodic ticker |
//! | [`ManualTicker`] | Test ticker fired through a handle |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

// ============================================================================
// Clock
// ============================================================================

/// A monotonic time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall time via [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

// ============================================================================
// Ticker
// ============================================================================

/// Paces a background loop.
#[async_trait]
pub trait Ticker: Send {
    /// Waits for the next tick. Returns `false` once the ticker is exhausted.
    async fn tick(&mut self) -> bool;
}

/// Periodic ticker backed by [`tokio::time::interval`].
///
/// The first tick fires one full period after creation.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// Creates a ticker with the given period.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticker fired by hand through a [`ManualTickerHandle`].
///
/// Dropping the handle exhausts the ticker.
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

/// Fires a [`ManualTicker`].
#[derive(Clone)]
pub struct ManualTickerHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicker {
    /// Creates a ticker and the handle that fires it.
    #[must_use]
    pub fn new() -> (Self, ManualTickerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ManualTickerHandle { tx })
    }
}

impl ManualTickerHandle {
    /// Releases one tick.
    pub fn fire(&self) {
        let _ = self.tx.send(());
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now() - start, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_manual_ticker_fires_and_exhausts() {
        let (mut ticker, handle) = ManualTicker::new();
        handle.fire();
        assert!(ticker.tick().await);
        drop(handle);
        assert!(!ticker.tick().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticker_waits_one_period() {
        let mut ticker = IntervalTicker::new(Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        assert!(ticker.tick().await);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
