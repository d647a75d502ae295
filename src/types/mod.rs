pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Three-axis reading (accel in g, gyro in deg/s).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Axes {
    pub const ZERO: Axes = Axes {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl From<Vec3> for Axes {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Axes> for Vec3 {
    fn from(a: Axes) -> Self {
        Vec3::new(a.x, a.y, a.z)
    }
}

/// Roll, pitch, yaw in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl EulerAngles {
    pub const ZERO: EulerAngles = EulerAngles {
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
    };

    /// ZYX Euler angles of a unit quaternion, converted to degrees.
    pub fn from_quaternion(q: &Quat) -> Self {
        let (roll, pitch, yaw) = q.euler_angles();
        Self {
            roll: roll.to_degrees(),
            pitch: pitch.to_degrees(),
            yaw: yaw.to_degrees(),
        }
    }
}

/// One reading from the sample source. Immutable once read.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    pub accel: Axes,
    pub gyro: Axes,
    pub temperature_c: f32,
    /// Monotonic microseconds since boot; wraps like a 32-bit hardware timer.
    pub timestamp_micros: u32,
}

/// The externally visible per-cycle state. Copied by value into every channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub accel: Axes,
    /// Bias-corrected angular rate.
    pub gyro: Axes,
    /// Dead-reckoned gyro-only attitude, each angle in (-180, 180].
    pub accumulated_gyro: EulerAngles,
    pub fusion: EulerAngles,
    pub temperature_c: f32,
    pub time_sec: f32,
}
