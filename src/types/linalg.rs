//! Linear algebra aliases for the orientation estimators
//!
//! Everything on the telemetry boundary is single precision, matching the
//! 32-bit float wire record, so the estimators work in `f32` too.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

pub type Vec3 = Vector3<f32>;
pub type Quat = UnitQuaternion<f32>;
pub type RawQuat = Quaternion<f32>;
