pub mod decode;
pub mod error;
pub mod policy;
pub mod windowed;
