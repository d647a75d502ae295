pub mod channels;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod filters;
pub mod live_status;
pub mod processor;
pub mod sensors;
pub mod types;

pub use channels::{Channel, ChannelHandle, Transmit};
pub use command::{Command, CommandRouter};
pub use config::{FusionSettings, TelemetryConfig};
pub use driver::Driver;
pub use error::{TelemetryError, TelemetryResult};
pub use filters::fusion_ahrs::{FusionAhrs, FusionEngine};
pub use processor::{OrientationProcessor, ProcessorHandle};
pub use sensors::SampleSource;
pub use types::{InertialSample, TelemetrySnapshot};
