//! Configuration module for the upload supervisor.
//!
//! This module handles parsing, validation, and access to the settings that
//! control where the server binary comes from, where it is installed, and how
//! patiently it is waited on. Configurations can be loaded from JSON or YAML
//! files or built programmatically.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use upload_supervisor::config::SupervisorConfig;
//!
//! let config = SupervisorConfig::from_file("receiver.json").unwrap();
//! println!("Uploads land in {}", config.upload_path().display());
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use upload_supervisor::config::{SupervisorConfig, validate_config};
//!
//! let mut config = SupervisorConfig::new("/tmp/uploads", "/opt/receiver/assets");
//! config.supported_abis = Some(vec!["x86_64".to_string()]);
//! validate_config(&config).unwrap();
//! ```
mod parser;
pub mod validator;

pub use parser::{
    DEFAULT_BINARY_NAME, DEFAULT_PORT, DEFAULT_UPLOAD_FILE_NAME, SupervisorConfig,
};
pub use validator::validate_config;
