pub mod coordinator;
pub mod partition;
pub mod report;
pub mod status;
