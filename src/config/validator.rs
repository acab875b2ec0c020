use crate::config::SupervisorConfig;
use crate::error::{Error, Result};

/// Validates the paths of a supervisor configuration
pub fn validate_paths(config: &SupervisorConfig) -> Result<()> {
    if config.storage_dir.as_os_str().is_empty() {
        return Err(Error::ConfigInvalid("storageDir is empty".to_string()));
    }

    if config.asset_dir.as_os_str().is_empty() {
        return Err(Error::ConfigInvalid("assetDir is empty".to_string()));
    }

    if let Some(dir) = &config.install_dir {
        if dir.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("installDir is empty".to_string()));
        }
    }

    // The binary name is joined onto installDir; a separator would escape it
    if config.binary_name.is_empty() || config.binary_name.contains('/') {
        return Err(Error::ConfigInvalid(format!(
            "binaryName '{}' must be a plain file name",
            config.binary_name
        )));
    }

    if config.upload_file_name.is_empty() || config.upload_file_name.contains('/') {
        return Err(Error::ConfigInvalid(format!(
            "uploadFileName '{}' must be a plain file name",
            config.upload_file_name
        )));
    }

    Ok(())
}

/// Validates the port and timing settings
pub fn validate_timing(config: &SupervisorConfig) -> Result<()> {
    if config.default_port == 0 {
        return Err(Error::ConfigInvalid("defaultPort must be non-zero".to_string()));
    }

    if config.grace_period_ms == 0 {
        return Err(Error::ConfigInvalid("gracePeriodMs must be non-zero".to_string()));
    }

    if config.readiness_timeout_ms < config.grace_period_ms {
        return Err(Error::ConfigInvalid(format!(
            "readinessTimeoutMs ({}) is shorter than gracePeriodMs ({})",
            config.readiness_timeout_ms, config.grace_period_ms
        )));
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &SupervisorConfig) -> Result<()> {
    validate_paths(config)?;
    validate_timing(config)?;

    if let Some(abis) = &config.supported_abis {
        if abis.iter().any(|abi| abi.trim().is_empty()) {
            return Err(Error::ConfigInvalid("supportedAbis contains an empty entry".to_string()));
        }
    }

    Ok(())
}
