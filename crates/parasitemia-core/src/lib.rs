pub mod error;
pub mod types;
pub mod units;

pub use error::*;
pub use types::*;
pub use units::*;
