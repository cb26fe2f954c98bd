//! `unitops.postgresql.Postgresql` service.

use serde::{Deserialize, Serialize};

use crate::S3Storage;

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PostgresLogicalBackupRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    #[prost(string, tag = "2")]
    pub database: String,

    #[prost(string, tag = "3")]
    pub key: String,

    #[prost(message, optional, tag = "4")]
    pub s3_storage: Option<S3Storage>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PostgresPhysicalBackupRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    #[prost(string, tag = "2")]
    pub key: String,

    #[prost(message, optional, tag = "3")]
    pub s3_storage: Option<S3Storage>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PostgresRestoreRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    #[prost(string, tag = "2")]
    pub database: String,

    #[prost(string, tag = "3")]
    pub key: String,

    #[prost(message, optional, tag = "4")]
    pub s3_storage: Option<S3Storage>,
}

pub mod postgresql_client {
    use tonic::codegen::{Body, Bytes, StdError};

    use super::*;
    use crate::{unary, ActionResponse};

    const SERVICE: &str = "unitops.postgresql.Postgresql";

    #[derive(Debug, Clone)]
    pub struct PostgresqlClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl PostgresqlClient<tonic::transport::Channel> {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }
    }

    impl<T> PostgresqlClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub async fn logical_backup(
            &mut self,
            request: impl tonic::IntoRequest<PostgresLogicalBackupRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "LogicalBackup",
                "/unitops.postgresql.Postgresql/LogicalBackup",
                request.into_request(),
            )
            .await
        }

        pub async fn physical_backup(
            &mut self,
            request: impl tonic::IntoRequest<PostgresPhysicalBackupRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "PhysicalBackup",
                "/unitops.postgresql.Postgresql/PhysicalBackup",
                request.into_request(),
            )
            .await
        }

        pub async fn restore(
            &mut self,
            request: impl tonic::IntoRequest<PostgresRestoreRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "Restore",
                "/unitops.postgresql.Postgresql/Restore",
                request.into_request(),
            )
            .await
        }
    }
}
