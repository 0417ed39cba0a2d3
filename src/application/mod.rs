// Application layer - the point ledger core and its tunables.
// Storage backends are injected through the traits in `crate::storage`.

pub mod config;
pub mod error;
pub mod locks;
pub mod service;

pub use config::*;
pub use error::*;
pub use locks::*;
pub use service::*;
