//! Configuration of the crc host: file locations, defaults and the settings registry.

mod defaults;
mod keys;
mod paths;
mod settings;
mod storage;
pub mod validate;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use keys::*;
pub use paths::*;
pub use settings::*;
pub use storage::*;
pub use validate::Validator;
