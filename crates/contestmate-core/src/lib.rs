pub mod config;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod identity;
pub mod insights;
pub mod typewriter;

pub use config::*;
pub use controller::*;
pub use conversation::*;
pub use error::*;
pub use identity::*;
pub use insights::*;
pub use typewriter::*;
