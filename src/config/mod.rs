//! Configuration: types, XML loading, path defaults, and validation.

pub mod paths;
pub mod types;
pub mod validate;
pub mod xml;

pub use paths::{default_config_path, default_ledger_path, default_log_path};
pub use types::{Config, LogLevel};
pub use validate::validate;
pub use xml::{LoadResult, load_config, load_or_init};
