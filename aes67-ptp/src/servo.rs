//! PI servo for PTP clock offset tracking.
//!
//! Produces a rate correction from proportional and integral terms of the
//! measured offset error. The correction feeds the host↔PTP affine mapping
//! rather than the system clock.

/// Lock threshold in nanoseconds
const LOCK_THRESHOLD_NS: f64 = 500.0;

/// Integrator anti-windup bound
const INTEGRATOR_LIMIT: f64 = 1e9;

/// Result of one servo update
#[derive(Debug, Clone, Copy)]
pub struct ServoUpdate {
    /// New rate ratio (1.0 = nominal)
    pub rate_ratio: f64,
    /// True if the lock state toggled on this update
    pub lock_changed: bool,
}

/// PI controller turning offset measurements into a rate ratio.
pub struct PiServo {
    kp: f64,
    ki: f64,
    integrator: f64,
    offset_ns: f64,
    rate_ratio: f64,
    locked: bool,
    /// Consecutive updates on the opposite side of the lock threshold.
    /// The state holds for one cycle before toggling.
    flip_pending: u32,
}

impl PiServo {
    pub fn new() -> Self {
        Self {
            kp: 1e-3,
            ki: 1e-4,
            integrator: 0.0,
            offset_ns: 0.0,
            rate_ratio: 1.0,
            locked: false,
            flip_pending: 0,
        }
    }

    /// Process a new offset measurement (nanoseconds from master).
    pub fn update(&mut self, offset_ns: f64) -> ServoUpdate {
        let error = offset_ns;
        self.offset_ns = error;

        self.integrator = (self.integrator + error).clamp(-INTEGRATOR_LIMIT, INTEGRATOR_LIMIT);
        let adjustment = self.kp * error + self.ki * self.integrator;
        self.rate_ratio = 1.0 + adjustment / 1e9;

        // Lock hysteresis: a threshold crossing must persist for a second
        // consecutive update before the state toggles.
        let candidate = error.abs() < LOCK_THRESHOLD_NS;
        let mut lock_changed = false;
        if candidate == self.locked {
            self.flip_pending = 0;
        } else {
            self.flip_pending += 1;
            if self.flip_pending >= 2 {
                self.locked = candidate;
                self.flip_pending = 0;
                lock_changed = true;
            }
        }

        ServoUpdate {
            rate_ratio: self.rate_ratio,
            lock_changed,
        }
    }

    pub fn offset_ns(&self) -> f64 {
        self.offset_ns
    }

    pub fn rate_ratio(&self) -> f64 {
        self.rate_ratio
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[cfg(test)]
    pub(crate) fn integrator(&self) -> f64 {
        self.integrator
    }

    pub fn reset(&mut self) {
        self.integrator = 0.0;
        self.offset_ns = 0.0;
        self.rate_ratio = 1.0;
        self.locked = false;
        self.flip_pending = 0;
    }
}

impl Default for PiServo {
    fn default() -> Self {
        Self::new()
    }
}
