pub mod file_ref;
pub mod operation;
pub mod plan;
