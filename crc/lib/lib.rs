//! `crc` provisions and manages a single-node OpenShift developer cluster inside a local virtual
//! machine.
//!
//! # Overview
//!
//! A long-running daemon owns the VM. It serves JSON requests on a Unix socket and drives the
//! VM through a hypervisor driver:
//!
//! - **Start**: creates the VM from a bundle on first use, boots it, then provisions the guest
//!   and the cluster over SSH in a fixed sequence of cancellable stages
//! - **Stop** and **Delete**: cancel any in-flight start before touching the VM
//! - **Status**, **IP** and **Console**: read-only queries answered while a start is running
//! - **Config**: a registry of validated settings persisted as JSON
//!
//! # Modules
//!
//! - [`api`] - The daemon socket: wire types, request handlers, server and client
//! - [`machine`] - Lifecycle operations and the synchronization wrapper
//! - [`driver`] - The hypervisor driver trait, its libvirt backend and the instance store
//! - [`cluster`] - Provisioning steps run inside the guest
//! - [`config`] - Paths, defaults and the settings registry
//! - [`cli`] - Command-line arguments of the `crc` binary

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;
mod log;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod api;
pub mod bundle;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod machine;
pub mod preflight;
pub mod pullsecret;
pub mod ssh;
pub mod utils;
pub mod version;

pub use error::*;
pub use log::*;
