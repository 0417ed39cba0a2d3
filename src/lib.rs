pub mod application;
pub mod cli;
pub mod domain;
pub mod io;
pub mod storage;

pub use application::{LedgerConfig, LedgerError, PointLedger, UnknownUserPolicy};
pub use domain::*;
