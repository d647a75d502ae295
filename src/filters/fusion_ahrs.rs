//! Gyroscope + accelerometer attitude fusion
//!
//! `FusionEngine` is the contract the orientation processor relies on; any
//! attitude filter that satisfies it can be substituted. `FusionAhrs` is the
//! default engine: a complementary filter whose accelerometer feedback gain
//! ramps down from a high initial value, which rejects the accelerometer while
//! the device is being shaken and re-anchors after a sustained rejection.
//! Conventions are NWU, rates in deg/s, acceleration in g.

use serde::Serialize;

use crate::config::FusionSettings;
use crate::filters::gyro_offset::GyroOffsetFilter;
use crate::types::{EulerAngles, Quat, RawQuat, Vec3};

const INITIAL_GAIN: f32 = 10.0;
/// seconds
const INITIALISATION_PERIOD: f32 = 3.0;
const GYROSCOPE_RANGE_FACTOR: f32 = 0.98;
const RECOVERY_DECREMENT: i32 = 9;

/// Attitude engine contract used by the orientation processor.
pub trait FusionEngine: Send {
    /// Re-apply settings and return the engine to its initial state.
    fn initialise(&mut self, settings: FusionSettings);

    /// Pass a raw rate (deg/s) through the bias-learning filter.
    fn update_offset(&mut self, raw_rate: Vec3) -> Vec3;

    /// Advance the attitude estimate with a corrected rate.
    fn update(&mut self, corrected_rate: Vec3, accel: Vec3, delta_time: f32);

    fn orientation(&self) -> Quat;

    fn euler(&self) -> EulerAngles {
        EulerAngles::from_quaternion(&self.orientation())
    }

    fn flags(&self) -> FusionFlags {
        FusionFlags::default()
    }
}

/// Engine status, reported in the live status document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct FusionFlags {
    pub initialising: bool,
    pub angular_rate_recovery: bool,
    pub acceleration_recovery: bool,
    pub accelerometer_ignored: bool,
    /// Angle between measured and estimated gravity, degrees.
    pub acceleration_error_deg: f32,
}

pub struct FusionAhrs {
    settings: FusionSettings,
    sample_rate_hz: u32,
    offset: GyroOffsetFilter,
    quaternion: Quat,
    initialising: bool,
    ramped_gain: f32,
    ramped_gain_step: f32,
    angular_rate_recovery: bool,
    half_accelerometer_feedback: Vec3,
    accelerometer_ignored: bool,
    acceleration_recovery_trigger: i32,
    acceleration_recovery_timeout: i32,
    // derived from settings
    acceleration_rejection_squared: f32,
    gyroscope_range_threshold: f32,
}

impl FusionAhrs {
    pub fn new(settings: FusionSettings, sample_rate_hz: u32) -> Self {
        let mut ahrs = Self {
            settings,
            sample_rate_hz,
            offset: GyroOffsetFilter::new(sample_rate_hz),
            quaternion: Quat::identity(),
            initialising: true,
            ramped_gain: INITIAL_GAIN,
            ramped_gain_step: 0.0,
            angular_rate_recovery: false,
            half_accelerometer_feedback: Vec3::zeros(),
            accelerometer_ignored: false,
            acceleration_recovery_trigger: 0,
            acceleration_recovery_timeout: 0,
            acceleration_rejection_squared: f32::MAX,
            gyroscope_range_threshold: f32::MAX,
        };
        ahrs.initialise(settings);
        ahrs
    }

    fn apply_settings(&mut self) {
        let s = &self.settings;
        self.gyroscope_range_threshold = if s.gyroscope_range == 0.0 {
            f32::MAX
        } else {
            s.gyroscope_range * GYROSCOPE_RANGE_FACTOR
        };
        self.acceleration_rejection_squared =
            if s.acceleration_rejection == 0.0 || s.gain == 0.0 || s.recovery_trigger_period == 0
            {
                f32::MAX
            } else {
                (0.5 * s.acceleration_rejection.to_radians().sin()).powi(2)
            };
        self.acceleration_recovery_timeout = s.recovery_trigger_period as i32;
        self.ramped_gain_step = (INITIAL_GAIN - s.gain) / INITIALISATION_PERIOD;
        if !self.initialising {
            self.ramped_gain = s.gain;
        }
    }

    fn reset_state(&mut self) {
        self.quaternion = Quat::identity();
        self.initialising = true;
        self.ramped_gain = INITIAL_GAIN;
        self.angular_rate_recovery = false;
        self.half_accelerometer_feedback = Vec3::zeros();
        self.accelerometer_ignored = false;
        self.acceleration_recovery_trigger = 0;
        self.acceleration_recovery_timeout = self.settings.recovery_trigger_period as i32;
    }

    /// Direction of gravity in the sensor frame, scaled by 0.5.
    fn half_gravity(&self) -> Vec3 {
        let q = self.quaternion.quaternion();
        let (w, x, y, z) = (q.w, q.i, q.j, q.k);
        Vec3::new(x * z - w * y, y * z + w * x, w * w - 0.5 + z * z)
    }

    fn feedback(sensor: Vec3, reference: Vec3) -> Vec3 {
        let cross = sensor.cross(&reference);
        if sensor.dot(&reference) < 0.0 {
            // opposing vectors: saturate the correction
            cross.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros)
        } else {
            cross
        }
    }

    fn set_heading(&mut self, heading_deg: f32) {
        let (_, _, yaw) = self.quaternion.euler_angles();
        let correction = Quat::from_axis_angle(&Vec3::z_axis(), heading_deg.to_radians() - yaw);
        self.quaternion = correction * self.quaternion;
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn gyro_offset(&self) -> Vec3 {
        self.offset.offset()
    }
}

impl FusionEngine for FusionAhrs {
    fn initialise(&mut self, settings: FusionSettings) {
        self.settings = settings;
        self.offset = GyroOffsetFilter::new(self.sample_rate_hz);
        self.reset_state();
        self.apply_settings();
    }

    fn update_offset(&mut self, raw_rate: Vec3) -> Vec3 {
        self.offset.update(raw_rate)
    }

    fn update(&mut self, corrected_rate: Vec3, accel: Vec3, delta_time: f32) {
        // Gyroscope saturated: restart the gain ramp but keep the attitude
        if corrected_rate
            .iter()
            .any(|axis| axis.abs() > self.gyroscope_range_threshold)
        {
            let quaternion = self.quaternion;
            self.reset_state();
            self.quaternion = quaternion;
            self.angular_rate_recovery = true;
        }

        if self.initialising {
            self.ramped_gain -= self.ramped_gain_step * delta_time;
            if self.ramped_gain < self.settings.gain || self.settings.gain == 0.0 {
                self.ramped_gain = self.settings.gain;
                self.initialising = false;
                self.angular_rate_recovery = false;
            }
        }

        let half_gravity = self.half_gravity();

        let mut half_accelerometer_feedback = Vec3::zeros();
        self.accelerometer_ignored = true;
        if let Some(accel_unit) = accel.try_normalize(f32::EPSILON) {
            self.half_accelerometer_feedback = Self::feedback(accel_unit, half_gravity);

            if self.initialising
                || self.half_accelerometer_feedback.norm_squared()
                    <= self.acceleration_rejection_squared
            {
                self.accelerometer_ignored = false;
                self.acceleration_recovery_trigger -= RECOVERY_DECREMENT;
            } else {
                self.acceleration_recovery_trigger += 1;
            }

            // Sustained rejection: trust the accelerometer again
            if self.acceleration_recovery_trigger > self.acceleration_recovery_timeout {
                self.acceleration_recovery_timeout = 0;
                self.accelerometer_ignored = false;
            } else {
                self.acceleration_recovery_timeout = self.settings.recovery_trigger_period as i32;
            }
            self.acceleration_recovery_trigger = self
                .acceleration_recovery_trigger
                .clamp(0, self.settings.recovery_trigger_period as i32);

            if !self.accelerometer_ignored {
                half_accelerometer_feedback = self.half_accelerometer_feedback;
            }
        }

        let half_gyroscope = corrected_rate * (0.5_f32.to_radians());
        let adjusted = half_gyroscope + half_accelerometer_feedback * self.ramped_gain;

        // q += q * (0, ω/2) * dt
        let q = self.quaternion.into_inner();
        let derivative = q * RawQuat::from_parts(0.0, adjusted);
        self.quaternion = Quat::new_normalize(q + derivative * delta_time);

        // No magnetometer: hold heading at zero until the gain ramp completes
        if self.initialising {
            self.set_heading(0.0);
        }
    }

    fn orientation(&self) -> Quat {
        self.quaternion
    }

    fn flags(&self) -> FusionFlags {
        FusionFlags {
            initialising: self.initialising,
            angular_rate_recovery: self.angular_rate_recovery,
            acceleration_recovery: self.acceleration_recovery_trigger > 0,
            accelerometer_ignored: self.accelerometer_ignored,
            acceleration_error_deg: (2.0 * self.half_accelerometer_feedback.norm())
                .clamp(-1.0, 1.0)
                .asin()
                .to_degrees(),
        }
    }
}
