pub mod error;
pub mod frame;
pub mod ledger;
pub mod lock;
pub mod merge;
pub mod summary;
