//! `unitops.mysql.Mysql` service.

use serde::{Deserialize, Serialize};

use crate::S3Storage;

/// What a logical backup covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum LogicalBackupMode {
    Full = 0,
    Database = 1,
    Table = 2,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MysqlLogicalBackupRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    /// Required unless `logical_backup_mode` is `Full`.
    #[prost(string, tag = "2")]
    pub database: String,

    /// Required when `logical_backup_mode` is `Table`.
    #[prost(string, tag = "3")]
    pub table: String,

    #[prost(enumeration = "LogicalBackupMode", tag = "4")]
    pub logical_backup_mode: i32,

    #[prost(string, tag = "5")]
    pub key: String,

    #[prost(message, optional, tag = "6")]
    pub s3_storage: Option<S3Storage>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MysqlPhysicalBackupRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    /// Copy threads used by the backup tool.
    #[prost(int64, tag = "2")]
    pub parallel: i64,

    #[prost(string, tag = "3")]
    pub key: String,

    #[prost(message, optional, tag = "4")]
    pub s3_storage: Option<S3Storage>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MysqlRestoreRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    #[prost(string, tag = "2")]
    pub key: String,

    #[prost(message, optional, tag = "3")]
    pub s3_storage: Option<S3Storage>,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MysqlPhysicalRestoreRequest {
    #[prost(int64, tag = "1")]
    pub parallel: i64,

    #[prost(string, tag = "2")]
    pub key: String,

    #[prost(message, optional, tag = "3")]
    pub s3_storage: Option<S3Storage>,
}

/// Clones a donor instance into the target unit with the clone plugin.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MysqlCloneRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    #[prost(string, tag = "2")]
    pub source_host: String,

    #[prost(int64, tag = "3")]
    pub source_port: i64,

    #[prost(string, tag = "4")]
    pub source_clone_user: String,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MysqlGtidPurgeRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    /// Keep the purged binlogs in the archive directory.
    #[prost(bool, tag = "2")]
    pub archive_mode: bool,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MysqlSetVariableRequest {
    #[prost(string, tag = "1")]
    pub username: String,

    #[prost(string, tag = "2")]
    pub key: String,

    #[prost(string, tag = "3")]
    pub value: String,
}

pub mod mysql_client {
    use tonic::codegen::{Body, Bytes, StdError};

    use super::*;
    use crate::{unary, ActionResponse, Empty};

    const SERVICE: &str = "unitops.mysql.Mysql";

    #[derive(Debug, Clone)]
    pub struct MysqlClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl MysqlClient<tonic::transport::Channel> {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }
    }

    impl<T> MysqlClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub async fn logical_backup(
            &mut self,
            request: impl tonic::IntoRequest<MysqlLogicalBackupRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "LogicalBackup",
                "/unitops.mysql.Mysql/LogicalBackup",
                request.into_request(),
            )
            .await
        }

        pub async fn physical_backup(
            &mut self,
            request: impl tonic::IntoRequest<MysqlPhysicalBackupRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "PhysicalBackup",
                "/unitops.mysql.Mysql/PhysicalBackup",
                request.into_request(),
            )
            .await
        }

        pub async fn restore(
            &mut self,
            request: impl tonic::IntoRequest<MysqlRestoreRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "Restore",
                "/unitops.mysql.Mysql/Restore",
                request.into_request(),
            )
            .await
        }

        pub async fn physical_restore(
            &mut self,
            request: impl tonic::IntoRequest<MysqlPhysicalRestoreRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "PhysicalRestore",
                "/unitops.mysql.Mysql/PhysicalRestore",
                request.into_request(),
            )
            .await
        }

        pub async fn clone_instance(
            &mut self,
            request: impl tonic::IntoRequest<MysqlCloneRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "Clone",
                "/unitops.mysql.Mysql/Clone",
                request.into_request(),
            )
            .await
        }

        pub async fn gtid_purge(
            &mut self,
            request: impl tonic::IntoRequest<MysqlGtidPurgeRequest>,
        ) -> Result<tonic::Response<ActionResponse>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "GtidPurge",
                "/unitops.mysql.Mysql/GtidPurge",
                request.into_request(),
            )
            .await
        }

        pub async fn set_variable(
            &mut self,
            request: impl tonic::IntoRequest<MysqlSetVariableRequest>,
        ) -> Result<tonic::Response<Empty>, tonic::Status> {
            unary(
                &mut self.inner,
                SERVICE,
                "SetVariable",
                "/unitops.mysql.Mysql/SetVariable",
                request.into_request(),
            )
            .await
        }
    }
}
