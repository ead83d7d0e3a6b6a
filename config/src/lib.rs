//! Settings for the replication topology orchestrator.
//!
//! The topology document is loaded once per process with [`load_config`] and then passed by
//! value to every component that needs it. Nothing in this crate keeps global state.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from_dir};
pub use secret::SerializableSecretString;
