pub mod constants;
pub mod domain;
pub mod error;
pub mod types;

pub use domain::*;
pub use error::EscrowError;
pub use types::*;
