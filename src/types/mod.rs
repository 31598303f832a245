pub mod dataset_kind;
pub mod entity;
pub mod record;
pub mod window;
