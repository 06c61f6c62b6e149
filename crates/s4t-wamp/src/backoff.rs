use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    /// Randomize each delay into `[d/2, d]` so reconnecting boards spread out.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Exponential reconnect delay. Never gives up; reset after a successful join.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempts.min(16);
        let delay = self.config.initial.saturating_mul(factor).min(self.config.max);
        self.attempts = self.attempts.saturating_add(1);

        if self.config.jitter && !delay.is_zero() {
            let half = delay / 2;
            half + rand::thread_rng().gen_range(Duration::ZERO..=half)
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> Backoff {
        Backoff::new(BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            jitter: false,
        })
    }

    #[test]
    fn test_doubles_until_cap() {
        let mut b = fixed();
        let delays: Vec<_> = (0..6).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_reset() {
        let mut b = fixed();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempts(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut b = Backoff::new(BackoffConfig {
            initial: Duration::from_millis(400),
            max: Duration::from_millis(400),
            jitter: true,
        });
        for _ in 0..100 {
            let d = b.next_delay();
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_many_attempts_do_not_overflow() {
        let mut b = fixed();
        for _ in 0..1000 {
            assert!(b.next_delay() <= Duration::from_secs(1));
        }
    }
}
