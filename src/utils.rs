use std::time::Duration;

/// Frames-per-second tracking over a reporting interval, fed by frame deltas.
pub struct FpsCounter {
    frame_count: u32,
    elapsed: Duration,
    interval: Duration,
    last: Option<f32>,
}

impl FpsCounter {
    /// Create a new FPS counter reporting once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            frame_count: 0,
            elapsed: Duration::ZERO,
            interval,
            last: None,
        }
    }

    /// Count one frame that took `delta`.
    /// Returns Some(fps) if the reporting interval has passed, otherwise None.
    pub fn update(&mut self, delta: Duration) -> Option<f32> {
        self.frame_count += 1;
        self.elapsed += delta;

        if self.elapsed >= self.interval {
            let fps = self.frame_count as f32 / self.elapsed.as_secs_f32();
            self.frame_count = 0;
            self.elapsed = Duration::ZERO;
            self.last = Some(fps);
            Some(fps)
        } else {
            None
        }
    }

    /// Most recent report.
    pub fn last(&self) -> Option<f32> {
        self.last
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
    fn test_reports_once_per_interval() {
        let mut fps = FpsCounter::new();
        let frame = Duration::from_millis(20);
        for _ in 0..49 {
            assert_eq!(fps.update(frame), None);
        }
        let report = fps.update(frame).unwrap();
        assert!((report - 50.0).abs() < 0.01);
        assert_eq!(fps.last(), Some(report));
        assert_eq!(fps.update(frame), None);
    }
}
