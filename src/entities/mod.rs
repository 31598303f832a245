pub mod error;
pub mod reference_list;
