use std::time::{Duration, Instant};

/// Counts presented frames and reports the rate once per interval.
pub struct FpsCounter {
    frames: u32,
    since: Instant,
    interval: Duration,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            frames: 0,
            since: Instant::now(),
            interval,
        }
    }

    /// Records one frame. Returns the rate when an interval has elapsed.
    pub fn update(&mut self) -> Option<f32> {
        self.frames += 1;
        let elapsed = self.since.elapsed();
        if elapsed < self.interval {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.since = Instant::now();
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_after_interval() {
        let mut counter = FpsCounter::with_interval(Duration::ZERO);
        let fps = counter.update().unwrap();
        assert!(fps > 0.0);

        let mut slow = FpsCounter::with_interval(Duration::from_secs(3600));
        assert!(slow.update().is_none());
    }
}
