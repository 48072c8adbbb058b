//! API endpoint wrappers, one per gateway area.

mod config;
mod health;
mod scripts;
mod secrets;
mod session;
mod tools;

pub use config::*;
pub use health::*;
pub use scripts::*;
pub use secrets::*;
pub use session::*;
pub use tools::*;
