//! Adaptive admission limits
//!
//! Both limits grow by 1.2x after a success and shrink by 1.1x after a
//! failure, clamped to their configured range after every change.

const INCREASE: f64 = 1.2;
const DECREASE: f64 = 1.1;

/// A value kept inside `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped {
    value: f64,
    min: f64,
    max: f64,
}

impl Clamped {
    /// Starts at the ceiling. `min > max` is treated as `min == max`.
    pub fn new(min: f64, max: f64) -> Self {
        let max = max.max(min);
        Self {
            value: max,
            min,
            max,
        }
    }

    pub fn get(&self) -> f64 {
        self.value
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn set(&mut self, value: f64) {
        self.value = value.clamp(self.min, self.max);
    }

    fn grow(&mut self) {
        self.set(self.value * INCREASE);
    }

    fn shrink(&mut self) {
        self.set(self.value / DECREASE);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowBounds {
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub min_queued_bytes: u64,
    pub max_queued_bytes: u64,
}

impl Default for WindowBounds {
    fn default() -> Self {
        Self {
            min_concurrency: 2,
            max_concurrency: 30,
            min_queued_bytes: 1_000_000,
            max_queued_bytes: 20_000_000,
        }
    }
}

/// Dynamic concurrency and in-flight byte limits.
#[derive(Debug, Clone, Copy)]
pub struct ControlWindow {
    concurrency: Clamped,
    queued_bytes: Clamped,
}

impl ControlWindow {
    pub fn new(bounds: WindowBounds) -> Self {
        Self {
            concurrency: Clamped::new(
                bounds.min_concurrency as f64,
                bounds.max_concurrency as f64,
            ),
            queued_bytes: Clamped::new(
                bounds.min_queued_bytes as f64,
                bounds.max_queued_bytes as f64,
            ),
        }
    }

    pub fn limit_concurrency(&self) -> f64 {
        self.concurrency.get()
    }

    pub fn limit_queued_bytes(&self) -> f64 {
        self.queued_bytes.get()
    }

    pub fn on_success(&mut self) {
        self.concurrency.grow();
        self.queued_bytes.grow();
    }

    pub fn on_failure(&mut self) {
        self.concurrency.shrink();
        self.queued_bytes.shrink();
    }

    /// Admission gate: an idle pipeline always admits, otherwise both
    /// limits must have room.
    pub fn admits(&self, in_flight: usize, in_flight_bytes: u64) -> bool {
        in_flight == 0
            || ((in_flight as f64) < self.concurrency.get()
                && (in_flight_bytes as f64) < self.queued_bytes.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_bounds(w: &ControlWindow, b: &WindowBounds) -> bool {
        let c = w.limit_concurrency();
        let q = w.limit_queued_bytes();
        c >= b.min_concurrency as f64
            && c <= b.max_concurrency as f64
            && q >= b.min_queued_bytes as f64
            && q <= b.max_queued_bytes as f64
    }

    #[test]
    fn failure_divides_by_one_point_one() {
        let b = WindowBounds::default();
        let mut w = ControlWindow::new(b);
        assert_eq!(w.limit_concurrency(), 30.0);
        w.on_failure();
        assert!((w.limit_concurrency() - 30.0 / 1.1).abs() < 1e-9);
        assert!((w.limit_queued_bytes() - 20_000_000.0 / 1.1).abs() < 1e-3);
    }

    #[test]
    fn limits_stay_in_range_under_any_sequence() {
        let b = WindowBounds::default();
        let mut w = ControlWindow::new(b);
        for _ in 0..200 {
            w.on_failure();
            assert!(in_bounds(&w, &b));
        }
        assert_eq!(w.limit_concurrency(), 2.0);
        assert_eq!(w.limit_queued_bytes(), 1_000_000.0);
        for i in 0..200 {
            if i % 7 == 0 {
                w.on_failure();
            } else {
                w.on_success();
            }
            assert!(in_bounds(&w, &b));
        }
    }

    #[test]
    fn successes_increase_until_ceiling() {
        let b = WindowBounds::default();
        let mut w = ControlWindow::new(b);
        for _ in 0..20 {
            w.on_failure();
        }
        let mut prev = w.limit_concurrency();
        for _ in 0..40 {
            w.on_success();
            let now = w.limit_concurrency();
            assert!(now > prev || now == 30.0);
            prev = now;
        }
        assert_eq!(prev, 30.0);
    }

    #[test]
    fn idle_pipeline_always_admits() {
        let w = ControlWindow::new(WindowBounds::default());
        assert!(w.admits(0, u64::MAX));
        assert!(!w.admits(1, 25_000_000));
        assert!(w.admits(5, 1_000));
        assert!(!w.admits(30, 1_000));
    }

    #[test]
    fn inverted_bounds_collapse() {
        let c = Clamped::new(5.0, 3.0);
        assert_eq!(c.get(), 5.0);
        assert_eq!(c.max(), 5.0);
    }
}
