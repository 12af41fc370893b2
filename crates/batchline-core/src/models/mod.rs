//! Data models for batches and the items they carry.

mod batch;
mod item;

pub use batch::*;
pub use item::*;
