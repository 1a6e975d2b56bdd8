use std::thread;
use std::time::{Duration, Instant};

/// Paces frame delivery to a target rate and measures the achieved rate.
pub struct FrameTimer {
    frame_duration: Duration,
    next_frame: Instant,
    frame_count: u32,
    last_time: Instant,
    interval: Duration,
    current_fps: Option<f64>,
}

impl FrameTimer {
    /// Create a timer for `fps` frames per second, reporting once per second.
    pub fn new(fps: f64) -> Self {
        let now = Instant::now();
        Self {
            frame_duration: Duration::from_secs_f64(1.0 / fps.max(f64::EPSILON)),
            next_frame: now,
            frame_count: 0,
            last_time: now,
            interval: Duration::from_secs(1),
            current_fps: None,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Time left until the next frame is due, zero if it is already late.
    pub fn time_until_next_frame(&self) -> Duration {
        self.next_frame.saturating_duration_since(Instant::now())
    }

    /// Sleeps until the next frame is due and schedules the one after.
    ///
    /// When running behind by more than a frame the schedule restarts from
    /// now instead of trying to catch up with a burst.
    pub fn sleep_until_next_frame(&mut self) {
        let wait = self.time_until_next_frame();
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        self.next_frame += self.frame_duration;
        let now = Instant::now();
        if self.next_frame + self.frame_duration < now {
            self.next_frame = now;
        }
    }

    /// Count a delivered frame.
    /// Returns Some(fps) if the reporting interval has passed, otherwise None.
    pub fn update(&mut self) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = self.last_time.elapsed();

        if elapsed >= self.interval {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.frame_count = 0;
            self.last_time = Instant::now();
            self.current_fps = Some(fps);
            Some(fps)
        } else {
            None
        }
    }

    /// Most recently measured rate, if a full interval has passed.
    pub fn current_fps(&self) -> Option<f64> {
        self.current_fps
    }
}
