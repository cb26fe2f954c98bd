//! Messages and clients spoken between the controller and the unit agents.
//!
//! The agent exposes one gRPC service per database engine ([`mysql`], [`postgresql`],
//! [`mongodb`], [`redis`]). Request messages double as the schema of a `GrpcCall`'s
//! `parameters`: they deserialize from camelCase JSON and reject unknown fields.
#![warn(clippy::indexing_slicing)]

use serde::{Deserialize, Serialize};
use tonic::codegen::{http::uri::PathAndQuery, Body, Bytes, StdError};

pub mod mongodb;
pub mod mysql;
pub mod postgresql;
pub mod redis;

/// Response of agent calls that produce no data.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Empty {}

/// Response of agent calls that report a human readable outcome.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ActionResponse {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// Location of a backup object in S3 compatible storage.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct S3Storage {
    #[prost(string, tag = "1")]
    pub endpoint: String,

    #[prost(string, tag = "2")]
    pub bucket: String,

    #[prost(string, tag = "3")]
    pub access_key: String,

    #[prost(string, tag = "4")]
    pub secret_key: String,

    /// Use https when talking to `endpoint`.
    #[prost(bool, tag = "5")]
    pub ssl: bool,
}

/// Gives access to the human readable part of an agent response.
pub trait HasMessage {
    fn message(&self) -> &str;
}

impl HasMessage for ActionResponse {
    fn message(&self) -> &str {
        &self.message
    }
}

impl HasMessage for Empty {
    fn message(&self) -> &str {
        ""
    }
}

/// Issues a single unary call on `inner`.
///
/// Shared by the per-engine clients, which only differ in the method path and the
/// message types.
pub(crate) async fn unary<T, Req, Resp>(
    inner: &mut tonic::client::Grpc<T>,
    service: &'static str,
    method: &'static str,
    path: &'static str,
    request: tonic::Request<Req>,
) -> Result<tonic::Response<Resp>, tonic::Status>
where
    T: tonic::client::GrpcService<tonic::body::BoxBody>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    inner.ready().await.map_err(|error| {
        tonic::Status::unknown(format!("service was not ready: {}", error.into()))
    })?;

    let codec = tonic::codec::ProstCodec::<Req, Resp>::default();
    let mut request = request;
    request
        .extensions_mut()
        .insert(tonic::GrpcMethod::new(service, method));

    inner
        .unary(request, PathAndQuery::from_static(path), codec)
        .await
}
