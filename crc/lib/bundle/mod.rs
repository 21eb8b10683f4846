//! Bundle metadata.
//!
//! A bundle is an archive holding the VM disk image, the direct-boot kernel, the cluster
//! credentials and a `crc-bundle-info.json` sidecar describing them. Bundles are extracted once
//! into the cache directory and read from there afterwards.

mod cache;
mod info;

#[cfg(test)]
pub(crate) use info::tests;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cache::*;
pub use info::*;
