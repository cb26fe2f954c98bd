//! Custom resources read and written by the controller.
//!
//! [`GrpcCall`] is the job: one remote operation against one [`Unit`]. Units are owned by
//! another controller and only ever read here.

pub mod grpc_call;
pub mod unit;

pub use grpc_call::{
    CallResult, GrpcCall, GrpcCallSpec, GrpcCallStatus, Operation, Parameters, UnitKind,
};
pub use unit::{Unit, UnitSpec, UNIT_SET_LABEL};
