use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Millisecond wall clock anchored once and advanced by the tokio clock.
///
/// Lease timestamps are compared across windows, so every window of a process should share
/// one `Clock`. Under a paused tokio runtime it advances with virtual time.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall_at_start: u64,
    started: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        let wall_at_start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            wall_at_start,
            started: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.wall_at_start + self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn follows_virtual_time() {
        let clock = Clock::new();
        let before = clock.now_ms();
        advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.now_ms() - before, 1500);
    }
}
