//! Frame timing and the fixed-step accumulator.
//!
//! The [`Time`] resource is advanced by the app at the start of each frame.
//! [`FixedTime`] turns the variable frame delta into a whole number of fixed
//! simulation steps and carries the remainder over to the next frame.

use std::time::Duration;

/// Frame timing resource. Inserted by the app and advanced each frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Time {
    delta: Duration,
    elapsed: Duration,
    frame_count: u64,
}

impl Time {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new frame that took `delta`.
    pub fn advance(&mut self, delta: Duration) {
        self.delta = delta;
        self.elapsed += delta;
        self.frame_count += 1;
    }

    /// Duration of the current frame.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    /// Frames advanced so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Estimated FPS based on the current frame's delta.
    pub fn fps(&self) -> f32 {
        if self.delta.as_secs_f32() > 0.0 {
            1.0 / self.delta.as_secs_f32()
        } else {
            0.0
        }
    }
}

/// Fixed-step clock for the `FixedUpdate` phase.
#[derive(Debug, Clone, Copy)]
pub struct FixedTime {
    step: Duration,
    accumulator: Duration,
    max_steps: u32,
    steps_this_frame: u32,
    total_steps: u64,
}

impl FixedTime {
    /// # Panics
    ///
    /// Panics if `step` is zero.
    pub fn new(step: Duration, max_steps: u32) -> Self {
        assert!(!step.is_zero(), "FixedTime step must be non-zero");
        Self {
            step,
            accumulator: Duration::ZERO,
            max_steps: max_steps.max(1),
            steps_this_frame: 0,
            total_steps: 0,
        }
    }

    pub fn from_hz(hz: f64, max_steps: u32) -> Self {
        assert!(
            hz.is_finite() && hz > 0.0,
            "FixedTime::from_hz: rate {hz} must be a positive number of steps per second"
        );
        Self::new(Duration::from_secs_f64(1.0 / hz), max_steps)
    }

    /// Add a frame's delta and return how many fixed steps to run now.
    ///
    /// At most `max_steps` run per frame. Time beyond that is dropped rather
    /// than carried, so a long stall cannot snowball into ever longer frames.
    pub fn accumulate(&mut self, delta: Duration) -> u32 {
        self.accumulator += delta;
        let due = (self.accumulator.as_nanos() / self.step.as_nanos()) as u64;
        let steps = if due > u64::from(self.max_steps) {
            log::warn!(
                "fixed update fell behind: {} steps due, running {}",
                due,
                self.max_steps
            );
            self.accumulator = Duration::from_nanos(
                (self.accumulator.as_nanos() % self.step.as_nanos()) as u64,
            );
            self.max_steps
        } else {
            self.accumulator -= self.step * due as u32;
            due as u32
        };
        self.steps_this_frame = steps;
        self.total_steps += u64::from(steps);
        steps
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn step_secs(&self) -> f32 {
        self.step.as_secs_f32()
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn steps_this_frame(&self) -> u32 {
        self.steps_this_frame
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Fraction of a step left in the accumulator, in `[0, 1)`. Used to
    /// interpolate between the last two fixed states.
    pub fn overstep_fraction(&self) -> f32 {
        (self.accumulator.as_secs_f64() / self.step.as_secs_f64()) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn time_advances() {
        let mut time = Time::new();
        time.advance(ms(16));
        time.advance(ms(20));
        assert_eq!(time.delta(), ms(20));
        assert_eq!(time.elapsed(), ms(36));
        assert_eq!(time.frame_count(), 2);
        assert!((time.fps() - 50.0).abs() < 1e-3);
    }

    #[test]
    fn remainder_carries_over() {
        let mut fixed = FixedTime::new(ms(10), 8);
        assert_eq!(fixed.accumulate(ms(25)), 2);
        assert!((fixed.overstep_fraction() - 0.5).abs() < 1e-6);
        assert_eq!(fixed.accumulate(ms(5)), 1);
        assert_eq!(fixed.overstep_fraction(), 0.0);
        assert_eq!(fixed.total_steps(), 3);
    }

    #[test]
    fn steps_are_clamped_and_excess_dropped() {
        let mut fixed = FixedTime::new(ms(10), 3);
        assert_eq!(fixed.accumulate(ms(1004)), 3);
        assert_eq!(fixed.steps_this_frame(), 3);
        assert!((fixed.overstep_fraction() - 0.4).abs() < 1e-6);
        assert_eq!(fixed.accumulate(ms(0)), 0);
    }

    #[test]
    fn from_hz_sets_step() {
        let fixed = FixedTime::from_hz(50.0, 4);
        assert_eq!(fixed.step(), ms(20));
    }

    #[test]
    #[should_panic(expected = "must be a positive number")]
    fn from_hz_rejects_zero_rate() {
        FixedTime::from_hz(0.0, 4);
    }
}
