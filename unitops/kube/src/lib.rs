#![warn(clippy::indexing_slicing)]

pub mod crd;
pub mod endpoint;
pub mod error;
