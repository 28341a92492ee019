//! Safety interlock and cooperative wait contract.
//!
//! The control loop never runs detached tasks. Every wait is either a single
//! bounded sleep (motion settle) or a [`WaitContract`] poll loop that samples
//! the [`SafetyInterlock`] between iterations, so an emergency stop is seen
//! within one poll interval.
//!
//! ```text
//!   emergency_stop() ──► latch ──► checked at every scan point / poll tick
//!   physical input   ──► latch     (reset refused while input asserted)
//!   abort_scan()     ──► one-shot flag consumed by the orchestrator
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{error, info};

use crate::error::{AppResult, InspectError};

#[derive(Debug, Default)]
struct InterlockInner {
    emergency_latched: AtomicBool,
    physical_asserted: AtomicBool,
    abort_requested: AtomicBool,
}

/// Shared emergency-stop latch and abort flag.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct SafetyInterlock {
    inner: Arc<InterlockInner>,
}

impl SafetyInterlock {
    /// Create an interlock with nothing asserted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the emergency stop. Idempotent.
    pub fn trip_emergency(&self) {
        if !self.inner.emergency_latched.swap(true, Ordering::SeqCst) {
            error!("Emergency stop latched");
        }
    }

    /// Whether the emergency latch is set.
    pub fn is_emergency(&self) -> bool {
        self.inner.emergency_latched.load(Ordering::SeqCst)
    }

    /// Report the state of the physical emergency input. Asserting it also
    /// latches the emergency stop; de-asserting it does not clear the latch.
    pub fn set_physical_input(&self, asserted: bool) {
        self.inner
            .physical_asserted
            .store(asserted, Ordering::SeqCst);
        if asserted {
            self.trip_emergency();
        }
    }

    /// Whether the physical emergency input is currently asserted.
    pub fn physical_asserted(&self) -> bool {
        self.inner.physical_asserted.load(Ordering::SeqCst)
    }

    /// Clear the emergency latch. Refused while the physical input is asserted.
    pub fn clear_emergency(&self) -> AppResult<()> {
        if self.physical_asserted() {
            return Err(InspectError::InterlockAsserted);
        }
        self.inner.emergency_latched.store(false, Ordering::SeqCst);
        self.inner.abort_requested.store(false, Ordering::SeqCst);
        info!("Emergency latch cleared");
        Ok(())
    }

    /// Ask the running scan to stop at the next point boundary.
    pub fn request_abort(&self) {
        self.inner.abort_requested.store(true, Ordering::SeqCst);
    }

    /// Whether an abort is pending (without consuming it).
    pub fn abort_requested(&self) -> bool {
        self.inner.abort_requested.load(Ordering::SeqCst)
    }

    /// Consume a pending abort request.
    pub fn take_abort(&self) -> bool {
        self.inner.abort_requested.swap(false, Ordering::SeqCst)
    }

    /// `Err(EmergencyStop)` if the latch is set.
    pub fn check(&self) -> AppResult<()> {
        if self.is_emergency() {
            Err(InspectError::EmergencyStop)
        } else {
            Ok(())
        }
    }
}

/// Result of a [`WaitContract`] poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// The condition was met; carries the satisfying sample.
    Satisfied(T),
    /// `max_duration` elapsed; carries the last sample, if any.
    TimedOut(Option<T>),
}

/// Bounded, interruptible polling: at most `max_duration`, one probe per
/// `poll_interval`, interlock checked before every probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitContract {
    /// Upper bound on the whole wait.
    pub max_duration: Duration,
    /// Delay between consecutive probes.
    pub poll_interval: Duration,
}

impl WaitContract {
    /// Construct a contract.
    pub fn new(max_duration: Duration, poll_interval: Duration) -> Self {
        Self {
            max_duration,
            poll_interval,
        }
    }

    /// Poll `probe` until `done` accepts a sample.
    ///
    /// `done` receives each sample together with the time it was taken, which
    /// lets callers express dwell conditions ("in band for N ms").
    ///
    /// # Errors
    ///
    /// `EmergencyStop` if the interlock latches during the wait, or the first
    /// error returned by `probe`.
    pub async fn poll_until<T, F, Fut, D>(
        &self,
        interlock: &SafetyInterlock,
        mut probe: F,
        mut done: D,
    ) -> AppResult<PollOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
        D: FnMut(&T, Instant) -> bool,
    {
        let started = Instant::now();
        let deadline = started + self.max_duration;

        loop {
            interlock.check()?;
            let sample = probe().await?;
            let now = Instant::now();
            if done(&sample, now) {
                return Ok(PollOutcome::Satisfied(sample));
            }
            if now >= deadline {
                return Ok(PollOutcome::TimedOut(Some(sample)));
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_physical_input_latches_and_blocks_reset() {
        let interlock = SafetyInterlock::new();
        interlock.set_physical_input(true);
        assert!(interlock.is_emergency());
        assert!(matches!(
            interlock.clear_emergency(),
            Err(InspectError::InterlockAsserted)
        ));

        interlock.set_physical_input(false);
        // still latched until explicitly cleared
        assert!(interlock.is_emergency());
        interlock.clear_emergency().unwrap();
        assert!(!interlock.is_emergency());
    }

    #[test]
    fn test_abort_is_one_shot() {
        let interlock = SafetyInterlock::new();
        let handle = interlock.clone();
        handle.request_abort();
        assert!(interlock.abort_requested());
        assert!(interlock.take_abort());
        assert!(!interlock.take_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_satisfied() {
        let interlock = SafetyInterlock::new();
        let contract = WaitContract::new(Duration::from_secs(1), Duration::from_millis(10));
        let count = Cell::new(0u32);
        let outcome = contract
            .poll_until(
                &interlock,
                || {
                    count.set(count.get() + 1);
                    let n = count.get();
                    async move { Ok(n) }
                },
                |n, _| *n >= 3,
            )
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Satisfied(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let interlock = SafetyInterlock::new();
        let contract = WaitContract::new(Duration::from_millis(100), Duration::from_millis(10));
        let started = Instant::now();
        let outcome = contract
            .poll_until(&interlock, || async { Ok(1.0_f64) }, |_, _| false)
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut(Some(1.0)));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_interrupted_by_emergency() {
        let interlock = SafetyInterlock::new();
        let contract = WaitContract::new(Duration::from_secs(10), Duration::from_millis(10));
        let trip = interlock.clone();
        let count = Cell::new(0u32);
        let result = contract
            .poll_until(
                &interlock,
                || {
                    count.set(count.get() + 1);
                    if count.get() == 5 {
                        trip.trip_emergency();
                    }
                    async { Ok(()) }
                },
                |_, _| false,
            )
            .await;
        assert!(matches!(result, Err(InspectError::EmergencyStop)));
        assert_eq!(count.get(), 5);
    }
}
