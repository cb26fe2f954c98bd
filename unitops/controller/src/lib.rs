//! Control plane of `GrpcCall`s: claims each call, dispatches it to the agent of its target
//! unit, records the outcome and collects finished calls once their TTL elapsed.
#![warn(clippy::indexing_slicing)]

pub mod cli;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod reconcile;
pub mod status;
pub mod store;
