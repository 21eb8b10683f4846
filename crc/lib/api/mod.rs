//! The daemon API.
//!
//! Each connection to the daemon socket carries one JSON request, `{"command": ..., "args": ...}`,
//! and receives one JSON response before the daemon closes it.

mod client;
mod handlers;
mod server;
mod types;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use client::*;
pub use handlers::*;
pub use server::*;
pub use types::*;
