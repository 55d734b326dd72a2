//! Silence watchdog: auto-stops a session after a quiet period.

use std::time::Duration;
use tokio::time::Instant;

/// A single cancellable deadline.
///
/// Speech ending arms it, speech starting cancels it. Arming while armed
/// restarts the deadline. An expired deadline fires once and disarms itself.
#[derive(Debug, Clone)]
pub struct SilenceWatchdog {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl SilenceWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    pub fn on_speech_ended(&mut self) {
        self.arm_at(Instant::now());
    }

    pub fn on_speech_started(&mut self) {
        self.cancel();
    }

    /// Arm relative to `now`, replacing any armed deadline.
    pub fn arm_at(&mut self, now: Instant) {
        let restarted = self.deadline.is_some();
        self.deadline = Some(now + self.timeout);
        tracing::debug!(
            timeout_ms = self.timeout.as_millis() as u64,
            restarted,
            "silence watchdog armed"
        );
    }

    pub fn cancel(&mut self) {
        if self.deadline.take().is_some() {
            tracing::debug!("silence watchdog cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Consume the deadline if it has passed. True at most once per arming.
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog() -> SilenceWatchdog {
        SilenceWatchdog::new(Duration::from_millis(2000))
    }

    #[test]
    fn test_starts_disarmed() {
        let dog = watchdog();
        assert!(!dog.is_armed());
        assert!(dog.deadline().is_none());
    }

    #[test]
    fn test_fires_once_after_timeout() {
        let mut dog = watchdog();
        let t0 = Instant::now();
        dog.arm_at(t0);

        assert!(!dog.poll_expired(t0 + Duration::from_millis(1999)));
        assert!(dog.poll_expired(t0 + Duration::from_millis(2000)));
        assert!(!dog.poll_expired(t0 + Duration::from_millis(5000)), "fires at most once");
        assert!(!dog.is_armed());
    }

    #[test]
    fn test_double_arm_keeps_single_timer() {
        let mut dog = watchdog();
        let t0 = Instant::now();
        dog.arm_at(t0);
        dog.arm_at(t0 + Duration::from_millis(500));

        assert_eq!(dog.deadline(), Some(t0 + Duration::from_millis(2500)));
        assert!(!dog.poll_expired(t0 + Duration::from_millis(2000)), "first deadline was replaced");

        let mut fired = 0;
        for ms in [2500, 3000, 4000] {
            if dog.poll_expired(t0 + Duration::from_millis(ms)) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_speech_started_cancels() {
        let mut dog = watchdog();
        let t0 = Instant::now();
        dog.arm_at(t0);
        dog.on_speech_started();

        assert!(!dog.is_armed());
        assert!(!dog.poll_expired(t0 + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_opt_waits_for_deadline() {
        let mut dog = watchdog();
        dog.on_speech_ended();
        let deadline = dog.deadline();

        sleep_until_opt(deadline).await;
        assert!(dog.poll_expired(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_opt_without_deadline_never_completes() {
        let result =
            tokio::time::timeout(Duration::from_secs(60), sleep_until_opt(None)).await;
        assert!(result.is_err());
    }
}
