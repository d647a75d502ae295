use crate::types::{EulerAngles, Quat, RawQuat, Vec3};

/// Wrap an angle in degrees into (-180, 180].
pub fn wrap_angle(degrees: f32) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Gyro-only attitude. No gravity correction, so it drifts without bound.
#[derive(Clone, Debug)]
pub struct GyroIntegrator {
    orientation: Quat,
    angles: EulerAngles,
}

impl GyroIntegrator {
    pub fn new() -> Self {
        Self {
            orientation: Quat::identity(),
            angles: EulerAngles::ZERO,
        }
    }

    /// Advance by `rate_dps` (deg/s, body frame) over `delta_time` seconds.
    pub fn step(&mut self, rate_dps: Vec3, delta_time: f32) -> EulerAngles {
        let omega = rate_dps.map(f32::to_radians);
        let omega_mag = omega.norm();

        if omega_mag > 0.0 && delta_time > 0.0 {
            let half_angle = 0.5 * omega_mag * delta_time;
            let s = half_angle.sin() / omega_mag;
            let delta = RawQuat::new(half_angle.cos(), omega.x * s, omega.y * s, omega.z * s);
            // q = q * delta, then renormalise
            self.orientation = Quat::new_normalize(self.orientation.into_inner() * delta);
        }

        let euler = EulerAngles::from_quaternion(&self.orientation);
        self.angles = EulerAngles {
            roll: wrap_angle(euler.roll),
            pitch: wrap_angle(euler.pitch),
            yaw: wrap_angle(euler.yaw),
        };
        self.angles
    }

    pub fn reset(&mut self) {
        self.orientation = Quat::identity();
        self.angles = EulerAngles::ZERO;
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn angles(&self) -> EulerAngles {
        self.angles
    }
}

impl Default for GyroIntegrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_wrap_angle_range() {
        let inputs = [
            0.0, 180.0, -180.0, 181.0, -181.0, 359.9, 360.0, 540.0, -540.0, 1.0e7, -1.0e7, 1.0e30,
            -1.0e-9,
        ];
        for input in inputs {
            let out = wrap_angle(input);
            assert!(out > -180.0 && out <= 180.0, "{} wrapped to {}", input, out);
        }
        assert_eq!(wrap_angle(-180.0), 180.0);
        assert_abs_diff_eq!(wrap_angle(190.0), -170.0, epsilon = 1e-4);
        assert_abs_diff_eq!(wrap_angle(-190.0), 170.0, epsilon = 1e-4);
        assert_eq!(wrap_angle(f32::NAN), 0.0);
        assert_eq!(wrap_angle(f32::INFINITY), 0.0);
    }

    #[test]
    fn test_yaw_integration() {
        let mut integrator = GyroIntegrator::new();
        let rate = Vec3::new(0.0, 0.0, 90.0);
        let mut angles = EulerAngles::ZERO;
        for _ in 0..100 {
            angles = integrator.step(rate, 0.01);
        }
        assert_abs_diff_eq!(angles.yaw, 90.0, epsilon = 0.1);
        assert_abs_diff_eq!(angles.roll, 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(angles.pitch, 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_zero_rate_leaves_state() {
        let mut integrator = GyroIntegrator::new();
        integrator.step(Vec3::new(10.0, 0.0, 0.0), 0.1);
        let before = integrator.orientation();
        integrator.step(Vec3::zeros(), 0.1);
        assert_eq!(integrator.orientation(), before);
    }

    #[test]
    fn test_quaternion_stays_normalised() {
        let mut integrator = GyroIntegrator::new();
        let rate = Vec3::new(123.4, -56.7, 250.0);
        for i in 0..10_000 {
            integrator.step(rate * ((i % 7) as f32 - 3.0), 0.01);
        }
        assert_abs_diff_eq!(integrator.orientation().quaternion().norm(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_accumulated_angles_always_wrapped() {
        let mut integrator = GyroIntegrator::new();
        let rate = Vec3::new(400.0, 0.0, 720.0);
        for _ in 0..1_000 {
            let a = integrator.step(rate, 0.01);
            for angle in [a.roll, a.pitch, a.yaw] {
                assert!(angle > -180.0 && angle <= 180.0);
            }
        }
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut integrator = GyroIntegrator::new();
        integrator.step(Vec3::new(30.0, 20.0, 10.0), 0.05);
        integrator.reset();
        let once = (integrator.orientation(), integrator.angles());
        integrator.reset();
        assert_eq!((integrator.orientation(), integrator.angles()), once);
        assert_eq!(once.0, Quat::identity());
        assert_eq!(once.1, EulerAngles::ZERO);
    }
}
