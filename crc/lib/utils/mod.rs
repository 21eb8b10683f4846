//! Host-side helpers shared by the driver and SSH backends.

mod command;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use command::*;
