pub mod backend;
pub mod config;
pub mod error;
pub mod types;

pub use backend::Backend;
pub use error::FirewallError;
pub use types::*;
