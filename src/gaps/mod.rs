pub mod audit;
pub mod detector;
