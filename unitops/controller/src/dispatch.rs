//! Maps `(kind, operation)` pairs to agent calls.
//!
//! Each [`Entry`] owns the typed request message of its call: the free form `parameters` of a
//! `GrpcCall` are decoded strictly into it, then the matching rpc is issued. Adding an
//! operation means registering one more entry in [`DispatchTable::builtin`].

use std::{collections::HashMap, future::Future, time::Duration};

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;
use unitops_kube::{
    crd::{Operation, Parameters, UnitKind},
    endpoint::AgentEndpoint,
};
use unitops_protocol::{
    mongodb::{mongodb_client::MongodbClient, MongodbLogicalBackupRequest, MongodbRestoreRequest},
    mysql::{
        mysql_client::MysqlClient, MysqlCloneRequest, MysqlGtidPurgeRequest,
        MysqlLogicalBackupRequest, MysqlPhysicalBackupRequest, MysqlPhysicalRestoreRequest,
        MysqlRestoreRequest, MysqlSetVariableRequest,
    },
    postgresql::{
        postgresql_client::PostgresqlClient, PostgresLogicalBackupRequest,
        PostgresPhysicalBackupRequest, PostgresRestoreRequest,
    },
    redis::{redis_client::RedisClient, RedisSetVariableRequest},
    HasMessage,
};

use crate::error::{DispatchError, DispatchResult};

/// Decodes `parameters` into `R`, failing on unknown fields and mismatched types.
pub fn decode_parameters<R>(parameters: &Parameters) -> DispatchResult<R>
where
    R: DeserializeOwned,
{
    let encoded = serde_json::to_vec(parameters)?;
    Ok(serde_json::from_slice(&encoded)?)
}

type Invoke<C> =
    Box<dyn Fn(C, &Parameters) -> BoxFuture<'static, DispatchResult<String>> + Send + Sync>;

/// A registered call, see [`DispatchTable::register`].
pub struct Entry<C> {
    invoke: Invoke<C>,
}

impl<C> Entry<C> {
    /// Decodes `parameters` and issues the call over `channel`, returns the response message.
    pub fn call(
        &self,
        channel: C,
        parameters: &Parameters,
    ) -> BoxFuture<'static, DispatchResult<String>> {
        (self.invoke)(channel, parameters)
    }
}

/// Read only after construction, shared between reconciliations without locking.
pub struct DispatchTable<C> {
    entries: HashMap<(UnitKind, Operation), Entry<C>>,
}

impl<C> Default for DispatchTable<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<C> DispatchTable<C>
where
    C: Send + 'static,
{
    /// Registers `invoke` as the call for `(kind, operation)`, replacing any previous entry.
    ///
    /// `Req` is the request message `parameters` decode into, `Resp` the response message
    /// whose [`HasMessage::message`] becomes the result of the call.
    pub fn register<Req, Resp, F, Fut>(
        &mut self,
        kind: UnitKind,
        operation: Operation,
        invoke: F,
    ) -> &mut Self
    where
        Req: DeserializeOwned,
        Resp: HasMessage,
        F: Fn(C, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<tonic::Response<Resp>, tonic::Status>> + Send + 'static,
    {
        let invoke: Invoke<C> = Box::new(move |channel: C, parameters: &Parameters| {
            match decode_parameters::<Req>(parameters) {
                Ok(request) => {
                    let call = invoke(channel, request);
                    async move {
                        let response = call.await?;
                        Ok(response.into_inner().message().to_owned())
                    }
                    .boxed()
                }
                Err(error) => futures::future::ready(Err(error)).boxed(),
            }
        });

        self.entries.insert((kind, operation), Entry { invoke });
        self
    }

    pub fn resolve(&self, kind: UnitKind, operation: Operation) -> DispatchResult<&Entry<C>> {
        self.entries
            .get(&(kind, operation))
            .ok_or(DispatchError::UnsupportedOperation { kind, operation })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DispatchTable<Channel> {
    /// Every call the unit agents serve.
    pub fn builtin() -> Self {
        let mut table = Self::default();

        table
            .register(
                UnitKind::Mysql,
                Operation::LogicalBackup,
                |channel, request: MysqlLogicalBackupRequest| async move {
                    MysqlClient::new(channel).logical_backup(request).await
                },
            )
            .register(
                UnitKind::Mysql,
                Operation::PhysicalBackup,
                |channel, request: MysqlPhysicalBackupRequest| async move {
                    MysqlClient::new(channel).physical_backup(request).await
                },
            )
            .register(
                UnitKind::Mysql,
                Operation::Restore,
                |channel, request: MysqlRestoreRequest| async move {
                    MysqlClient::new(channel).restore(request).await
                },
            )
            .register(
                UnitKind::Mysql,
                Operation::PhysicalRestore,
                |channel, request: MysqlPhysicalRestoreRequest| async move {
                    MysqlClient::new(channel).physical_restore(request).await
                },
            )
            .register(
                UnitKind::Mysql,
                Operation::Clone,
                |channel, request: MysqlCloneRequest| async move {
                    MysqlClient::new(channel).clone_instance(request).await
                },
            )
            .register(
                UnitKind::Mysql,
                Operation::GtidPurge,
                |channel, request: MysqlGtidPurgeRequest| async move {
                    MysqlClient::new(channel).gtid_purge(request).await
                },
            )
            .register(
                UnitKind::Mysql,
                Operation::SetVariable,
                |channel, request: MysqlSetVariableRequest| async move {
                    MysqlClient::new(channel).set_variable(request).await
                },
            );

        table
            .register(
                UnitKind::Postgresql,
                Operation::LogicalBackup,
                |channel, request: PostgresLogicalBackupRequest| async move {
                    PostgresqlClient::new(channel).logical_backup(request).await
                },
            )
            .register(
                UnitKind::Postgresql,
                Operation::PhysicalBackup,
                |channel, request: PostgresPhysicalBackupRequest| async move {
                    PostgresqlClient::new(channel).physical_backup(request).await
                },
            )
            .register(
                UnitKind::Postgresql,
                Operation::Restore,
                |channel, request: PostgresRestoreRequest| async move {
                    PostgresqlClient::new(channel).restore(request).await
                },
            );

        table
            .register(
                UnitKind::Mongodb,
                Operation::LogicalBackup,
                |channel, request: MongodbLogicalBackupRequest| async move {
                    MongodbClient::new(channel).logical_backup(request).await
                },
            )
            .register(
                UnitKind::Mongodb,
                Operation::Restore,
                |channel, request: MongodbRestoreRequest| async move {
                    MongodbClient::new(channel).restore(request).await
                },
            );

        table.register(
            UnitKind::Redis,
            Operation::SetVariable,
            |channel, request: RedisSetVariableRequest| async move {
                RedisClient::new(channel).set_variable(request).await
            },
        );

        table
    }
}

/// Opens channels to unit agents.
pub trait Connector: Send + Sync {
    type Channel: Send + 'static;

    fn connect(&self, endpoint: &AgentEndpoint) -> DispatchResult<Self::Channel>;
}

/// Lazily connected tonic channels. The connection is made by the first call, so an
/// unreachable agent surfaces as an rpc error.
#[derive(Clone, Debug)]
pub struct GrpcConnector {
    pub connect_timeout: Duration,

    /// [`None`] waits for the agent as long as the call takes.
    pub request_timeout: Option<Duration>,
}

impl Connector for GrpcConnector {
    type Channel = Channel;

    fn connect(&self, endpoint: &AgentEndpoint) -> DispatchResult<Channel> {
        let mut channel = Endpoint::from_shared(endpoint.uri())
            .map_err(|source| DispatchError::Endpoint {
                endpoint: endpoint.to_string(),
                source,
            })?
            .connect_timeout(self.connect_timeout);

        if let Some(timeout) = self.request_timeout {
            channel = channel.timeout(timeout);
        }

        Ok(channel.connect_lazy())
    }
}

/// Issues the call for `(kind, operation)` against an agent.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Returns the response message of the agent.
    async fn dispatch(
        &self,
        endpoint: &AgentEndpoint,
        kind: UnitKind,
        operation: Operation,
        parameters: &Parameters,
    ) -> DispatchResult<String>;
}

/// [`Dispatch`] through a [`DispatchTable`].
pub struct Dispatcher<K: Connector> {
    table: DispatchTable<K::Channel>,
    connector: K,
}

impl<K: Connector> Dispatcher<K> {
    pub fn new(table: DispatchTable<K::Channel>, connector: K) -> Self {
        Self { table, connector }
    }
}

#[async_trait]
impl<K: Connector> Dispatch for Dispatcher<K> {
    #[tracing::instrument(level = "debug", skip(self, parameters), err)]
    async fn dispatch(
        &self,
        endpoint: &AgentEndpoint,
        kind: UnitKind,
        operation: Operation,
        parameters: &Parameters,
    ) -> DispatchResult<String> {
        let entry = self.table.resolve(kind, operation)?;
        let channel = self.connector.connect(endpoint)?;

        let message = entry.call(channel, parameters).await?;
        debug!(%message, "agent answered");

        Ok(message)
    }
}
