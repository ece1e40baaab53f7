pub mod backend;
pub mod error;

pub use backend::*;
pub use error::*;
