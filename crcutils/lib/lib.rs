//! `crcutils` is a library containing general utilities for the crc project.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod error;
pub mod retry;
pub mod term;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use retry::*;
