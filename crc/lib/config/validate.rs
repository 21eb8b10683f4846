//! Validators for config settings and start resources.

use std::net::Ipv4Addr;

use serde_json::Value;
use sysinfo::System;

use super::{
    DEFAULT_CPUS, DEFAULT_DISK_SIZE_GIB, DEFAULT_MEMORY_MIB, MINIMUM_MEMORY_FOR_MONITORING_MIB,
};
use crate::{CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A config value validator. Returns the reason the value is rejected.
pub type Validator = fn(&Value) -> Result<(), String>;

//--------------------------------------------------------------------------------------------------
// Functions: Resources
//--------------------------------------------------------------------------------------------------

/// Checks the CPU count against the minimum.
pub fn validate_cpu_count(cpus: u32) -> Result<(), String> {
    if cpus < DEFAULT_CPUS {
        return Err(format!("requires CPUs >= {DEFAULT_CPUS}"));
    }
    Ok(())
}

/// Checks the memory size against the minimum.
pub fn validate_memory_size(memory_mib: u32, monitoring_enabled: bool) -> Result<(), String> {
    if memory_mib < DEFAULT_MEMORY_MIB {
        return Err(format!("requires memory in MiB >= {DEFAULT_MEMORY_MIB}"));
    }
    if monitoring_enabled && memory_mib < MINIMUM_MEMORY_FOR_MONITORING_MIB {
        return Err(format!(
            "too little memory ({memory_mib} MiB) allocated to the virtual machine to start the monitoring stack, {MINIMUM_MEMORY_FOR_MONITORING_MIB} MiB is the minimum"
        ));
    }
    Ok(())
}

/// Checks the disk size against the minimum.
pub fn validate_disk_size_gib(disk_gib: u32) -> Result<(), String> {
    if disk_gib < DEFAULT_DISK_SIZE_GIB {
        return Err(format!("requires disk size in GiB >= {DEFAULT_DISK_SIZE_GIB}"));
    }
    Ok(())
}

/// Checks all resource minimums of a start request.
pub fn validate_start_resources(
    cpus: u32,
    memory_mib: u32,
    disk_gib: u32,
    monitoring_enabled: bool,
) -> CrcResult<()> {
    validate_cpu_count(cpus)
        .and_then(|_| validate_memory_size(memory_mib, monitoring_enabled))
        .and_then(|_| validate_disk_size_gib(disk_gib))
        .map_err(CrcError::Validation)
}

/// Checks that the host has at least `memory_mib` of physical memory.
pub fn validate_enough_host_memory(memory_mib: u32) -> Result<(), String> {
    let mut system = System::new();
    system.refresh_memory();

    let total = system.total_memory();
    let required = u64::from(memory_mib) * 1024 * 1024;
    tracing::debug!("total memory of system is {} bytes", total);

    if total < required {
        return Err(format!(
            "only {} MiB of memory found ({} MiB required)",
            total / 1024 / 1024,
            memory_mib
        ));
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Settings
//--------------------------------------------------------------------------------------------------

pub(crate) fn validate_cpus(value: &Value) -> Result<(), String> {
    validate_cpu_count(as_u32(value)?)
}

pub(crate) fn validate_memory(value: &Value) -> Result<(), String> {
    let memory = as_u32(value)?;
    validate_memory_size(memory, false)?;
    validate_enough_host_memory(memory)
}

pub(crate) fn validate_disk_size(value: &Value) -> Result<(), String> {
    let disk = as_u32(value)?;
    validate_disk_size_gib(disk)?;
    if cfg!(target_os = "macos") && disk > DEFAULT_DISK_SIZE_GIB {
        return Err("Disk resizing is not supported on macOS".to_string());
    }
    Ok(())
}

pub(crate) fn validate_ip_address(value: &Value) -> Result<(), String> {
    let ip = as_str(value)?;
    ip.parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| format!("'{ip}' is not a valid IPv4 address"))
}

pub(crate) fn validate_path(value: &Value) -> Result<(), String> {
    let path = as_str(value)?;
    if !std::path::Path::new(path).exists() {
        return Err(format!("file '{path}' does not exist"));
    }
    Ok(())
}

pub(crate) fn validate_bool(value: &Value) -> Result<(), String> {
    match value {
        Value::Bool(_) => Ok(()),
        _ => Err("must be true or false".to_string()),
    }
}

pub(crate) fn validate_uri(value: &Value) -> Result<(), String> {
    let uri = as_str(value)?;
    let rest = uri
        .strip_prefix("http://")
        .or_else(|| uri.strip_prefix("https://"))
        .ok_or_else(|| format!("'{uri}' is not a valid proxy URI, it must start with http:// or https://"))?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(format!("'{uri}' has no host"));
    }
    Ok(())
}

pub(crate) fn validate_no_proxy(value: &Value) -> Result<(), String> {
    let no_proxy = as_str(value)?;
    if no_proxy.contains(char::is_whitespace) {
        return Err("NoProxy string can't contain spaces".to_string());
    }
    Ok(())
}

pub(crate) fn validate_yes_no(value: &Value) -> Result<(), String> {
    match as_str(value)? {
        "yes" | "no" => Ok(()),
        _ => Err("must be yes or no".to_string()),
    }
}

pub(crate) fn validate_network_mode(value: &Value) -> Result<(), String> {
    match as_str(value)? {
        "default" | "vsock" => Ok(()),
        other => Err(format!("network mode '{other}' is not supported, use 'default' or 'vsock'")),
    }
}

fn as_u32(value: &Value) -> Result<u32, String> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| "requires integer value".to_string())
}

fn as_str(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| "requires string value".to_string())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_start_resource_minimums() {
        assert!(validate_start_resources(4, 9216, 31, false).is_ok());
        assert!(validate_start_resources(3, 9216, 31, false).is_err());
        assert!(validate_start_resources(4, 8192, 31, false).is_err());
        assert!(validate_start_resources(4, 9216, 30, false).is_err());

        let error = validate_start_resources(4, 9216, 31, true).unwrap_err();
        assert!(error.to_string().contains("14336"));
        assert!(validate_start_resources(4, 14336, 31, true).is_ok());
    }

    #[test]
    fn test_setting_validators() {
        assert!(validate_ip_address(&json!("8.8.8.8")).is_ok());
        assert!(validate_ip_address(&json!("::1")).is_err());
        assert!(validate_ip_address(&json!("not-an-ip")).is_err());

        assert!(validate_uri(&json!("http://proxy.example.com:3128")).is_ok());
        assert!(validate_uri(&json!("ftp://proxy.example.com")).is_err());
        assert!(validate_uri(&json!("https://")).is_err());

        assert!(validate_no_proxy(&json!("localhost,127.0.0.1")).is_ok());
        assert!(validate_no_proxy(&json!("localhost, 127.0.0.1")).is_err());

        assert!(validate_yes_no(&json!("yes")).is_ok());
        assert!(validate_yes_no(&json!("maybe")).is_err());

        assert!(validate_network_mode(&json!("vsock")).is_ok());
        assert!(validate_network_mode(&json!("slirp")).is_err());

        assert!(validate_cpus(&json!(8)).is_ok());
        assert!(validate_cpus(&json!(2)).is_err());
        assert!(validate_path(&json!("/definitely/not/here")).is_err());
    }
}
