pub mod fusion_ahrs;
pub mod gyro_integrator;
pub mod gyro_offset;
