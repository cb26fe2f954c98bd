//! `unitops.redis.Redis` service.

use serde::{Deserialize, Serialize};

/// `CONFIG SET <key> <value>` on the unit's redis server.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct RedisSetVariableRequest {
    #[prost(string, tag = "1")]
    pub key: String,

    #[prost(string, tag = "2")]
    pub value: String,
}

pub mod redis_client {
    use tonic::codegen::{Body, Bytes, StdError};

    use super::*;
    use crate::{unary, Empty};

    #[derive(Debug, Clone)]
    pub struct RedisClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl RedisClient<tonic::transport::Channel> {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }
    }

    impl<T> RedisClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub async fn set_variable(
            &mut self,
            request: impl tonic::IntoRequest<RedisSetVariableRequest>,
        ) -> Result<tonic::Response<Empty>, tonic::Status> {
            unary(
                &mut self.inner,
                "unitops.redis.Redis",
                "SetVariable",
                "/unitops.redis.Redis/SetVariable",
                request.into_request(),
            )
            .await
        }
    }
}
