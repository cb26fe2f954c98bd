use thiserror::Error;
use unitops_kube::{
    crd::{Operation, UnitKind},
    error::KubeApiError,
};

pub type DispatchResult<T, E = DispatchError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("operation `{operation}` is not supported on `{kind}` units")]
    UnsupportedOperation { kind: UnitKind, operation: Operation },

    /// `parameters` do not fit the request message, the serde message names the field.
    #[error("invalid parameters: {0}")]
    ParameterDecode(#[from] serde_json::Error),

    #[error("invalid agent endpoint `{endpoint}`: {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("agent call failed with {}: {}", .0.code(), .0.message())]
    Rpc(#[from] tonic::Status),
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Kube(#[from] KubeApiError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
