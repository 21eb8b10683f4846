//! Host checks run before a start.
//!
//! Every check can be turned off with its `skip-<check>` setting.

use std::path::PathBuf;

use crate::{
    bundle::BundleCache,
    config::{self, validate, ApplyMode, Config, CrcPaths},
    CrcError, CrcResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What the checks inspect.
pub struct PreflightContext<'a> {
    /// Host file locations.
    pub paths: &'a CrcPaths,

    /// Settings registry.
    pub config: &'a Config,
}

struct Check {
    name: &'static str,
    description: &'static str,
    run: fn(&PreflightContext) -> Result<(), String>,
    linux_only: bool,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const SKIP_PREFIX: &str = "skip-";

const CHECKS: &[Check] = &[
    Check {
        name: "check-root-user",
        description: "Checking if running as root",
        run: check_not_root,
        linux_only: false,
    },
    Check {
        name: "check-crc-home",
        description: "Checking if the crc home directory exists",
        run: check_home_dir,
        linux_only: false,
    },
    Check {
        name: "check-bundle-extracted",
        description: "Checking if the bundle is available",
        run: check_bundle,
        linux_only: false,
    },
    Check {
        name: "check-ssh-client",
        description: "Checking if an SSH client is installed",
        run: check_ssh_client,
        linux_only: false,
    },
    Check {
        name: "check-virsh-installed",
        description: "Checking if libvirt is installed",
        run: check_virsh,
        linux_only: true,
    },
];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Registers the `skip-<check>` settings on `cfg`.
pub fn register_settings(cfg: &mut Config) {
    for check in applicable_checks() {
        cfg.add_setting(
            &skip_key(check.name),
            false,
            validate::validate_bool,
            ApplyMode::Immediate,
        );
    }
}

/// The settings that skip a check on this platform.
pub fn skip_keys() -> Vec<String> {
    applicable_checks().map(|check| skip_key(check.name)).collect()
}

/// Runs every check that is not skipped, stopping at the first failure.
pub fn start_preflight_checks(ctx: &PreflightContext) -> CrcResult<()> {
    for check in applicable_checks() {
        let key = skip_key(check.name);
        if ctx.config.get_bool(&key) {
            tracing::debug!("skipping {}", check.name);
            continue;
        }

        tracing::debug!("{}", check.description);
        (check.run)(ctx).map_err(CrcError::Preflight)?;
    }

    Ok(())
}

fn applicable_checks() -> impl Iterator<Item = &'static Check> {
    CHECKS
        .iter()
        .filter(|check| !check.linux_only || cfg!(target_os = "linux"))
}

fn skip_key(name: &str) -> String {
    format!("{SKIP_PREFIX}{name}")
}

fn check_not_root(_: &PreflightContext) -> Result<(), String> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    if unsafe { libc::geteuid() } != 0 {
        return Ok(());
    }

    Err(format!(
        "crc should not be ran as root. Turn off this check with 'crc config set {} true'",
        skip_key("check-root-user")
    ))
}

fn check_home_dir(ctx: &PreflightContext) -> Result<(), String> {
    if ctx.paths.get_home().is_dir() {
        return Ok(());
    }

    Err(format!(
        "{} does not exist, run 'crc setup' first",
        ctx.paths.get_home().display()
    ))
}

fn check_bundle(ctx: &PreflightContext) -> Result<(), String> {
    let bundle = PathBuf::from(ctx.config.get_string(config::BUNDLE));
    let name = bundle
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !name.is_empty() && BundleCache::new(ctx.paths.clone()).is_cached(&name) {
        return Ok(());
    }

    if bundle.is_file() {
        return Ok(());
    }

    Err(format!(
        "{} not found, run 'crc setup' to unpack the bundle or use 'crc config set {} <path>'",
        bundle.display(),
        config::BUNDLE
    ))
}

fn check_ssh_client(_: &PreflightContext) -> Result<(), String> {
    which::which("ssh")
        .map(|path| tracing::debug!("found SSH client at {}", path.display()))
        .map_err(|e| format!("ssh executable not found: {e}"))
}

fn check_virsh(_: &PreflightContext) -> Result<(), String> {
    which::which("virsh")
        .map(|path| tracing::debug!("found virsh at {}", path.display()))
        .map_err(|e| format!("virsh executable not found, install libvirt: {e}"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
