mod balance;
mod ledger;
mod points;
mod record;

pub use balance::*;
pub use ledger::*;
pub use points::*;
pub use record::*;
