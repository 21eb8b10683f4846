//! Build and bundle version information.

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The crc version.
pub const CRC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The OpenShift version of the bundle this build supports.
pub const BUNDLE_VERSION: &str = "4.6.1";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The commit this binary was built from, if recorded at build time.
pub fn commit_sha() -> &'static str {
    option_env!("CRC_COMMIT_SHA").unwrap_or("unknown")
}

/// The default bundle file name for this platform.
pub fn default_bundle_name() -> String {
    bundle_name_for_os(std::env::consts::OS, BUNDLE_VERSION)
}

/// The bundle file name used on `os` for `bundle_version`.
pub fn bundle_name_for_os(os: &str, bundle_version: &str) -> String {
    let hypervisor = match os {
        "macos" => "hyperkit",
        "windows" => "hyperv",
        _ => "libvirt",
    };
    format!("crc_{hypervisor}_{bundle_version}.crcbundle")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_name_for_os() {
        assert_eq!(bundle_name_for_os("linux", "4.6.1"), "crc_libvirt_4.6.1.crcbundle");
        assert_eq!(bundle_name_for_os("macos", "4.6.1"), "crc_hyperkit_4.6.1.crcbundle");
        assert_eq!(bundle_name_for_os("windows", "4.7.0"), "crc_hyperv_4.7.0.crcbundle");
    }
}
