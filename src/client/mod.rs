pub mod endpoint;
pub mod error;
pub mod rate_limited;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
