//! Level confirmation for glitch-prone modem lines.

use crate::gpio::Level;
use std::time::Duration;

/// Re-samples a line a fixed number of times before an edge is trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfirmWindow {
    samples: u32,
    interval: Duration,
}

impl ConfirmWindow {
    pub const fn new(samples: u32, interval: Duration) -> Self {
        Self { samples, interval }
    }

    pub fn span(&self) -> Duration {
        self.interval.saturating_mul(self.samples)
    }

    /// Sleeps one interval before each sample. Returns `false` as soon as a
    /// sample differs from `expected`.
    pub async fn hold<F>(&self, expected: Level, mut sample: F) -> bool
    where
        F: FnMut() -> Level,
    {
        for _ in 0..self.samples {
            tokio::time::sleep(self.interval).await;
            if sample() != expected {
                return false;
            }
        }
        true
    }
}
