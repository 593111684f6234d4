pub mod config;
pub mod types;

pub use config::{EngineConfig, RinzlerConfig};
pub use types::*;
