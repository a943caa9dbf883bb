//! A single caller-supplied deadline from which every downstream timeout is
//! derived.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// The timeout for one outbound call: the smaller of its own cap and the
    /// time left.
    pub fn cap(&self, limit: Duration) -> Duration {
        limit.min(self.remaining())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cap_takes_the_tighter_bound() {
        let deadline = Deadline::after(Duration::from_secs(10));
        assert_eq!(deadline.cap(Duration::from_secs(5)), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(deadline.cap(Duration::from_secs(5)), Duration::from_secs(2));
        assert!(!deadline.is_expired());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.cap(Duration::from_secs(5)), Duration::ZERO);
    }
}
