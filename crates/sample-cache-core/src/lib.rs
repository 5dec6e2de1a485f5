pub mod config;
pub mod definition;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod lock;
pub mod pool;
pub mod progress;
pub mod samples;
pub mod staging;
pub mod storage;

pub use config::AppConfig;
pub use engine::{RefreshReport, SamplesCache};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
pub use samples::{File, Sample, SampleEntry, SampleGroup, SampleKey};
