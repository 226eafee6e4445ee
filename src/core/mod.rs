mod blocked;
mod config;
mod cycle;
mod detector;
mod driver;
mod logger;
mod registry;
mod report;
pub(crate) mod types;

pub use config::{GateConfig, TimedWaitStrategy};
pub use detector::{Detector, LockWatch};
pub use registry::LockDescriptor;
pub use report::{FacadeSink, LogSink};
pub use types::*;
