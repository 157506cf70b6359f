//! Pipeline vocabulary shared by every layer.

pub mod codes;
pub mod entities;
pub mod types;
