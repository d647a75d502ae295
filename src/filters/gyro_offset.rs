use crate::types::Vec3;

const CUTOFF_FREQUENCY_HZ: f32 = 0.02;
const TIMEOUT_SECS: u32 = 5;
/// deg/s
const STATIONARY_THRESHOLD: f32 = 3.0;

/// Learns gyro bias only after every axis has stayed under the threshold
/// for the timeout; any motion restarts the wait.
#[derive(Clone, Debug)]
pub struct GyroOffsetFilter {
    filter_coefficient: f32,
    timeout: u32,
    timer: u32,
    offset: Vec3,
}

impl GyroOffsetFilter {
    pub fn new(sample_rate_hz: u32) -> Self {
        let sample_rate_hz = sample_rate_hz.max(1);
        Self {
            filter_coefficient: 2.0
                * std::f32::consts::PI
                * CUTOFF_FREQUENCY_HZ
                * (1.0 / sample_rate_hz as f32),
            timeout: TIMEOUT_SECS.saturating_mul(sample_rate_hz),
            timer: 0,
            offset: Vec3::zeros(),
        }
    }

    /// Remove the current bias estimate from `raw` (deg/s) and refine it.
    pub fn update(&mut self, raw: Vec3) -> Vec3 {
        let corrected = raw - self.offset;

        if corrected.iter().any(|axis| axis.abs() > STATIONARY_THRESHOLD) {
            self.timer = 0;
            return corrected;
        }

        if self.timer < self.timeout {
            self.timer += 1;
            return corrected;
        }

        self.offset += corrected * self.filter_coefficient;
        corrected
    }

    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    pub fn is_learning(&self) -> bool {
        self.timer >= self.timeout
    }
}
