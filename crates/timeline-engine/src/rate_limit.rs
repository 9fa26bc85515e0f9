use std::sync::Arc;
use std::time::Duration;

use timeline_core::SharedSettings;
use tokio::sync::Mutex;
use tokio::time::Instant;

const MIN_SPACING: Duration = Duration::from_millis(500);

/// Spaces generator requests to at most `rate_limit` per minute.
#[derive(Clone)]
pub struct RateLimiter {
    settings: SharedSettings,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(settings: SharedSettings) -> Self {
        Self {
            settings,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Gap required between requests, or `None` when unlimited.
    pub fn spacing(rate_limit: u32) -> Option<Duration> {
        if rate_limit == 0 {
            return None;
        }
        let per_request = Duration::from_millis(60_000 / u64::from(rate_limit));
        Some(per_request.max(MIN_SPACING))
    }

    /// Waits until the next request may go out and records it.
    pub async fn acquire(&self) {
        let rate_limit = self.settings.read().rate_limit;
        let mut last_request = self.last_request.lock().await;

        if let (Some(spacing), Some(previous)) = (Self::spacing(rate_limit), *last_request) {
            let elapsed = previous.elapsed();
            if elapsed < spacing {
                let wait = spacing - elapsed;
                log::debug!("[rate-limit] waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }

        *last_request = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use timeline_core::Settings;

    use super::*;

    #[test]
    fn spacing_has_a_floor() {
        assert_eq!(RateLimiter::spacing(0), None);
        assert_eq!(RateLimiter::spacing(60), Some(Duration::from_secs(1)));
        assert_eq!(RateLimiter::spacing(600), Some(MIN_SPACING));
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_waits_for_spacing() {
        let settings = Settings {
            rate_limit: 30,
            ..Default::default()
        }
        .into_shared();
        let limiter = RateLimiter::new(settings);

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        tokio::time::advance(Duration::from_millis(500)).await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::new(Settings::default().into_shared());
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
