//! Timing knobs of the session drive loop.

use std::time::Duration;

use timeline_core::host::{EventBus, EventKind, EventWaiter};
use timeline_core::Settings;

pub const MAX_RETRIES: usize = 5;
pub const RETRY_BACKOFF_MS: [u64; 4] = [500, 1000, 2000, 3000];

/// How dead-end retries are paced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Dead ends tolerated before the session is aborted.
    pub max_retries: usize,
    /// Delay before each swipe attempt and, after those fail, each trigger attempt.
    pub backoff: Vec<Duration>,
    /// Extra wait before the first swipe.
    pub ui_settle: Duration,
    pub swipe_ready_timeout: Duration,
    pub swipe_poll: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            backoff: RETRY_BACKOFF_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            ui_settle: Duration::from_secs(5),
            swipe_ready_timeout: Duration::from_secs(10),
            swipe_poll: Duration::from_millis(200),
        }
    }
}

/// Decides when a profile swap has taken effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapSettlePolicy {
    /// First of the model-changed or online-status events, or the timeout.
    EventRace { timeout: Duration },
    FixedDelay(Duration),
    Immediate,
}

impl Default for SwapSettlePolicy {
    fn default() -> Self {
        SwapSettlePolicy::EventRace {
            timeout: Duration::from_secs(3),
        }
    }
}

impl SwapSettlePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        SwapSettlePolicy::EventRace {
            timeout: Duration::from_millis(settings.profile_swap_timeout_ms),
        }
    }

    /// Subscribes before the swap command runs so its events are not missed.
    pub fn arm(&self, events: &EventBus) -> Option<EventWaiter> {
        match self {
            SwapSettlePolicy::EventRace { .. } => Some(events.waiter(&[
                EventKind::ChatCompletionModelChanged,
                EventKind::OnlineStatusChanged,
            ])),
            _ => None,
        }
    }

    /// Returns whether the host confirmed the swap. Proceeding on `false` is
    /// expected.
    pub async fn settle(&self, waiter: Option<EventWaiter>) -> bool {
        match (self, waiter) {
            (SwapSettlePolicy::EventRace { timeout }, Some(waiter)) => {
                let settled = waiter.wait(*timeout).await.is_some();
                if !settled {
                    log::debug!("[session] profile swap not confirmed within {:?}", timeout);
                }
                settled
            }
            (SwapSettlePolicy::FixedDelay(delay), _) => {
                tokio::time::sleep(*delay).await;
                true
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use timeline_core::host::HostEvent;

    use super::*;

    #[tokio::test]
    async fn event_race_settles_on_model_change() {
        let bus = EventBus::default();
        let policy = SwapSettlePolicy::default();
        let waiter = policy.arm(&bus);

        bus.emit(HostEvent::ChatCompletionModelChanged("gpt-4o".to_string()));

        assert!(policy.settle(waiter).await);
    }

    #[tokio::test(start_paused = true)]
    async fn event_race_proceeds_after_timeout() {
        let bus = EventBus::default();
        let policy = SwapSettlePolicy::EventRace {
            timeout: Duration::from_secs(3),
        };
        let waiter = policy.arm(&bus);
        let started = tokio::time::Instant::now();

        assert!(!policy.settle(waiter).await);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn default_schedule_matches_backoff_table() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.backoff.len(), 4);
        assert_eq!(schedule.backoff[3], Duration::from_secs(3));
        assert_eq!(schedule.max_retries, 5);
    }
}
