//! Agent side of a call: runs the database tools as child processes and moves their
//! input and output between the processes and object storage.
#![warn(clippy::indexing_slicing)]

pub mod error;
pub mod executor;
pub mod storage;

pub use executor::{CommandExecutor, ExecutorConfig, NamedCommand, PipeMode};
pub use storage::{ObjectStorage, ObjectStoreStorage, StorageConfig};
