pub mod config;

pub use config::{LoaderConfig, ValidatorConfig};
