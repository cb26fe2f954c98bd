//! `unitops.mongodb.Mongodb` service.

use serde::{Deserialize, Serialize};

use crate::S3Storage;

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MongodbLogicalBackupRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    /// Database holding the user's credentials, `admin` when empty.
    #[prost(string, tag = "2")]
    pub auth_source: String,

    #[prost(string, tag = "3")]
    pub key: String,

    #[prost(message, optional, tag = "4")]
    pub s3_storage: Option<S3Storage>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MongodbRestoreRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    #[prost(string, tag = "2")]
    pub auth_source: String,

    #[prost(string, tag = "3")]
    pub key: String,

    #[prost(message, optional, tag = "4")]
    pub s3_storage: Option<S3Storage>,
}

pub mod mongodb_client {
    use tonic::codegen::{Body, Bytes, StdError};

    use super::*;
    use crate::{unary, ActionResponse};

    const SERVICE: &str = "unitops.mongodb.Mongodb";

    #[derive(Debug, Clone)]
    pub struct MongodbClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl MongodbClient<tonic::transport::Channel> {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }
    }

    impl<T> MongodbClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub async fn logical_backup(
            &mut self,
            request: impl tonic::IntoRequest<MongodbLogicalBackupRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "LogicalBackup",
                "/unitops.mongodb.Mongodb/LogicalBackup",
                request.into_request(),
            )
            .await
        }

        pub async fn restore(
            &mut self,
            request: impl tonic::IntoRequest<MongodbRestoreRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "Restore",
                "/unitops.mongodb.Mongodb/Restore",
                request.into_request(),
            )
            .await
        }
    }
}
