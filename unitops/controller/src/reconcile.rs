//! The state machine driving a `GrpcCall` from creation to deletion.
//!
//! A call is dispatched at most once: the first reconciliation that finds it unclaimed sets
//! its start time, runs it and records the outcome in the same pass. Later passes only
//! collect it once its TTL elapsed.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use kube::{runtime::controller::Action, ResourceExt};
use tracing::{debug, info, warn};
use unitops_kube::{
    crd::{CallResult, GrpcCall, GrpcCallSpec, GrpcCallStatus},
    endpoint::EndpointResolver,
    error::KubeApiError,
};

use crate::{
    dispatch::Dispatch,
    error::{ControllerError, Result},
    notify::{Notifier, Severity},
    status::{has_changed, CallState},
    store::CallStore,
};

const SUCCEEDED_REASON: &str = "GrpcCallSucceeded";
const FAILED_REASON: &str = "GrpcCallFailed";
const ABANDONED_REASON: &str = "GrpcCallAbandoned";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delay before a call is looked at again, regardless of the outcome of its dispatch.
    pub requeue_interval: Duration,

    /// Calls claimed longer ago than this without completing are closed as failed.
    /// [`None`] keeps them claimed forever.
    pub claim_timeout: Option<Duration>,
}

pub struct Reconciler {
    calls: Arc<dyn CallStore>,
    resolver: EndpointResolver,
    dispatcher: Arc<dyn Dispatch>,
    notifier: Arc<dyn Notifier>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        calls: Arc<dyn CallStore>,
        resolver: EndpointResolver,
        dispatcher: Arc<dyn Dispatch>,
        notifier: Arc<dyn Notifier>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            calls,
            resolver,
            dispatcher,
            notifier,
            config,
        }
    }

    /// Reconciles the call `namespace/name`, a missing call is not an error.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        self.reconcile_at(namespace, name, Utc::now()).await
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub(crate) async fn reconcile_at(
        &self,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Action> {
        let Some(call) = self.calls.get(namespace, name).await? else {
            debug!("call is gone");
            return Ok(Action::await_change());
        };

        let state = CallState::of(&call, now);
        debug!(?state, "reconciling");

        match state {
            CallState::Retained => Ok(Action::await_change()),
            CallState::PendingTtl { remaining } => Ok(Action::requeue(remaining)),
            CallState::ExpiredTtl => {
                info!("ttl elapsed, deleting call");
                self.calls.delete(namespace, name).await?;
                Ok(Action::await_change())
            }
            CallState::AlreadyStarted { since } => {
                self.abandon_expired_claim(namespace, name, &call, since, now)
                    .await?;
                Ok(Action::requeue(self.config.requeue_interval))
            }
            CallState::Fresh => {
                self.run(namespace, name, &call, now).await?;
                Ok(Action::requeue(self.config.requeue_interval))
            }
        }
    }

    /// Claims, dispatches and completes a fresh call in a single status write.
    async fn run(
        &self,
        namespace: &str,
        name: &str,
        call: &GrpcCall,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let snapshot = call.status.clone().unwrap_or_default();
        let mut status = snapshot.clone();
        status.start_time = Some(now);

        let spec = &call.spec;
        let (severity, reason) = match self.execute(namespace, spec).await {
            Ok(message) => {
                info!(operation = %spec.operation, unit = %spec.target_ref, "call succeeded");
                status.result = Some(CallResult::Success);
                status.message = if message.is_empty() {
                    format!("{} succeeded", spec.operation)
                } else {
                    message
                };

                (Severity::Normal, SUCCEEDED_REASON)
            }
            Err(error) => {
                warn!(%error, operation = %spec.operation, unit = %spec.target_ref, "call failed");
                status.result = Some(CallResult::Failed);
                status.message = format!(
                    "{} on unit {} failed: {error}",
                    spec.operation, spec.target_ref
                );

                (Severity::Warning, FAILED_REASON)
            }
        };

        self.notifier
            .notify(namespace, &spec.target_ref, severity, reason, &status.message)
            .await;

        if status.completion_time.is_none() {
            status.completion_time = Some(Utc::now().max(now));
        }

        self.persist(namespace, name, &status, &snapshot).await
    }

    async fn execute(&self, namespace: &str, spec: &GrpcCallSpec) -> Result<String> {
        let endpoint = self.resolver.resolve(namespace, &spec.target_ref).await?;

        Ok(self
            .dispatcher
            .dispatch(&endpoint, spec.kind, spec.operation, &spec.parameters)
            .await?)
    }

    /// Closes a call whose claim is older than [`ReconcilerConfig::claim_timeout`]. The agent
    /// may still be running it, so it is failed rather than dispatched again.
    async fn abandon_expired_claim(
        &self,
        namespace: &str,
        name: &str,
        call: &GrpcCall,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(claim_timeout) = self.config.claim_timeout else {
            return Ok(());
        };

        let claimed_for = now.signed_duration_since(since).to_std().unwrap_or_default();
        if claimed_for < claim_timeout {
            debug!(%since, "call is claimed, not dispatching again");
            return Ok(());
        }

        let snapshot = call.status.clone().unwrap_or_default();
        let spec = &call.spec;
        let status = GrpcCallStatus {
            result: Some(CallResult::Failed),
            message: format!(
                "{} on unit {} failed: claimed at {since} and never completed",
                spec.operation, spec.target_ref
            ),
            completion_time: Some(now),
            ..snapshot.clone()
        };

        warn!(%since, "claim expired, failing call");
        self.notifier
            .notify(
                namespace,
                &spec.target_ref,
                Severity::Warning,
                ABANDONED_REASON,
                &status.message,
            )
            .await;

        self.persist(namespace, name, &status, &snapshot).await
    }

    async fn persist(
        &self,
        namespace: &str,
        name: &str,
        status: &GrpcCallStatus,
        snapshot: &GrpcCallStatus,
    ) -> Result<()> {
        if !has_changed(status, snapshot) {
            return Ok(());
        }

        self.calls.patch_status(namespace, name, status).await?;
        Ok(())
    }
}

/// Entry point for [`kube::runtime::Controller::run`].
pub async fn reconcile(call: Arc<GrpcCall>, reconciler: Arc<Reconciler>) -> Result<Action> {
    let namespace = call
        .namespace()
        .ok_or_else(|| KubeApiError::missing_field(call.as_ref(), ".metadata.namespace"))?;

    reconciler.reconcile(&namespace, &call.name_any()).await
}

/// Retries failed reconciliations (store errors) after the requeue interval.
pub fn error_policy(
    call: Arc<GrpcCall>,
    error: &ControllerError,
    reconciler: Arc<Reconciler>,
) -> Action {
    warn!(%error, call = %call.name_any(), "reconciliation failed");
    Action::requeue(reconciler.config.requeue_interval)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use chrono::TimeDelta;
    use k8s_openapi::{
        api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec},
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };
    use serde_json::json;
    use unitops_kube::{
        crd::{Operation, Parameters, Unit, UnitKind, UnitSpec, UNIT_SET_LABEL},
        endpoint::{AgentEndpoint, UnitSource, AGENT_CONTAINER_NAME, AGENT_PORT_NAME},
    };
    use unitops_protocol::{mysql::MysqlLogicalBackupRequest, ActionResponse};

    use super::*;
    use crate::{
        dispatch::{Connector, DispatchTable, Dispatcher},
        error::{DispatchError, DispatchResult},
    };

    const NAMESPACE: &str = "namespace";

    #[derive(Default)]
    struct MemoryStore {
        calls: Mutex<HashMap<String, GrpcCall>>,
        patches: AtomicUsize,
    }

    impl MemoryStore {
        fn with(call: GrpcCall) -> Arc<Self> {
            let store = Self::default();
            store
                .calls
                .lock()
                .unwrap()
                .insert(call.name_any(), call);
            Arc::new(store)
        }

        fn status(&self, name: &str) -> GrpcCallStatus {
            self.calls.lock().unwrap()[name]
                .status
                .clone()
                .unwrap_or_default()
        }

        fn contains(&self, name: &str) -> bool {
            self.calls.lock().unwrap().contains_key(name)
        }
    }

    #[async_trait]
    impl CallStore for MemoryStore {
        async fn get(
            &self,
            _: &str,
            name: &str,
        ) -> unitops_kube::error::Result<Option<GrpcCall>> {
            Ok(self.calls.lock().unwrap().get(name).cloned())
        }

        async fn patch_status(
            &self,
            _: &str,
            name: &str,
            status: &GrpcCallStatus,
        ) -> unitops_kube::error::Result<()> {
            self.patches.fetch_add(1, Ordering::Relaxed);
            if let Some(call) = self.calls.lock().unwrap().get_mut(name) {
                call.status = Some(status.clone());
            }
            Ok(())
        }

        async fn delete(&self, _: &str, name: &str) -> unitops_kube::error::Result<()> {
            self.calls.lock().unwrap().remove(name);
            Ok(())
        }
    }

    struct Units(Vec<Unit>);

    #[async_trait]
    impl UnitSource for Units {
        async fn get_unit(
            &self,
            namespace: &str,
            name: &str,
        ) -> unitops_kube::error::Result<Option<Unit>> {
            Ok(self
                .0
                .iter()
                .find(|unit| {
                    unit.metadata.namespace.as_deref() == Some(namespace)
                        && unit.metadata.name.as_deref() == Some(name)
                })
                .cloned())
        }
    }

    fn unit(name: &str, port_name: &str) -> Unit {
        let mut unit = Unit::new(
            name,
            UnitSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: AGENT_CONTAINER_NAME.to_owned(),
                            ports: Some(vec![ContainerPort {
                                name: Some(port_name.to_owned()),
                                container_port: 9090,
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
            },
        );
        unit.metadata = ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(NAMESPACE.to_owned()),
            labels: Some([(UNIT_SET_LABEL.to_owned(), "group".to_owned())].into()),
            ..Default::default()
        };
        unit
    }

    type Dispatched = Vec<(AgentEndpoint, UnitKind, Operation, Parameters)>;

    /// Records every dispatch and answers with a fixed outcome.
    struct FakeDispatch {
        dispatched: Mutex<Dispatched>,
        answer: fn() -> DispatchResult<String>,
    }

    impl FakeDispatch {
        fn answering(answer: fn() -> DispatchResult<String>) -> Arc<Self> {
            Arc::new(Self {
                dispatched: Default::default(),
                answer,
            })
        }

        fn count(&self) -> usize {
            self.dispatched.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Dispatch for FakeDispatch {
        async fn dispatch(
            &self,
            endpoint: &AgentEndpoint,
            kind: UnitKind,
            operation: Operation,
            parameters: &Parameters,
        ) -> DispatchResult<String> {
            self.dispatched.lock().unwrap().push((
                endpoint.clone(),
                kind,
                operation,
                parameters.clone(),
            ));
            (self.answer)()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<(String, Severity, String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            _: &str,
            target: &str,
            severity: Severity,
            reason: &str,
            message: &str,
        ) {
            self.events.lock().unwrap().push((
                target.to_owned(),
                severity,
                reason.to_owned(),
                message.to_owned(),
            ));
        }
    }

    const CONFIG: ReconcilerConfig = ReconcilerConfig {
        requeue_interval: Duration::from_secs(30),
        claim_timeout: Some(Duration::from_secs(3600)),
    };

    struct Harness {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        reconciler: Reconciler,
    }

    fn harness(call: GrpcCall, units: Vec<Unit>, dispatcher: Arc<dyn Dispatch>) -> Harness {
        let store = MemoryStore::with(call);
        let notifier = Arc::new(RecordingNotifier::default());
        let reconciler = Reconciler::new(
            store.clone(),
            EndpointResolver::new(Arc::new(Units(units))),
            dispatcher,
            notifier.clone(),
            CONFIG,
        );

        Harness {
            store,
            notifier,
            reconciler,
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    fn grpc_call(operation: Operation, parameters: serde_json::Value) -> GrpcCall {
        let mut call = GrpcCall::new(
            "backup",
            GrpcCallSpec {
                target_ref: "unit-name".to_owned(),
                kind: UnitKind::Mysql,
                operation,
                ttl_after_finished: Some(600),
                parameters: serde_json::from_value(parameters).unwrap(),
            },
        );
        call.metadata.namespace = Some(NAMESPACE.to_owned());
        call
    }

    fn logical_backup() -> GrpcCall {
        grpc_call(
            Operation::LogicalBackup,
            json!({ "username": "root", "database": "app", "logicalBackupMode": 0 }),
        )
    }

    #[tokio::test]
    async fn fresh_call_succeeds() {
        let dispatcher = FakeDispatch::answering(|| Ok("backup uploaded".to_owned()));
        let h = harness(
            logical_backup(),
            vec![unit("unit-name", AGENT_PORT_NAME)],
            dispatcher.clone(),
        );

        let action = h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();

        assert_eq!(action, Action::requeue(CONFIG.requeue_interval));
        let status = h.store.status("backup");
        assert_eq!(status.result, Some(CallResult::Success));
        assert_eq!(status.message, "backup uploaded");
        assert_eq!(status.start_time, Some(at(0)));
        assert!(status.completion_time.is_some());
        assert_eq!(h.store.patches.load(Ordering::Relaxed), 1);

        let dispatched = dispatcher.dispatched.lock().unwrap();
        let (endpoint, kind, operation, parameters) = &dispatched[0];
        assert_eq!(endpoint.host, "unit-name.group-headless.namespace.svc");
        assert_eq!(endpoint.port, "9090");
        assert_eq!(*kind, UnitKind::Mysql);
        assert_eq!(*operation, Operation::LogicalBackup);
        assert_eq!(parameters["database"], json!("app"));

        let events = h.notifier.events.lock().unwrap();
        assert_eq!(
            *events,
            [(
                "unit-name".to_owned(),
                Severity::Normal,
                SUCCEEDED_REASON.to_owned(),
                "backup uploaded".to_owned(),
            )]
        );
    }

    #[tokio::test]
    async fn empty_message_names_the_operation() {
        let h = harness(
            grpc_call(
                Operation::SetVariable,
                json!({ "username": "root", "key": "max_connections", "value": "500" }),
            ),
            vec![unit("unit-name", AGENT_PORT_NAME)],
            FakeDispatch::answering(|| Ok(String::new())),
        );

        h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();

        let status = h.store.status("backup");
        assert_eq!(status.result, Some(CallResult::Success));
        assert_eq!(status.message, "set-variable succeeded");
    }

    #[tokio::test]
    async fn dispatch_failure_is_recorded_and_notified() {
        let h = harness(
            logical_backup(),
            vec![unit("unit-name", AGENT_PORT_NAME)],
            FakeDispatch::answering(|| {
                Err(DispatchError::Rpc(tonic::Status::internal("mysqldump exited with 2")))
            }),
        );

        let action = h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();

        assert_eq!(action, Action::requeue(CONFIG.requeue_interval));
        let status = h.store.status("backup");
        assert_eq!(status.result, Some(CallResult::Failed));
        assert!(status.completion_time.is_some());
        assert!(
            status
                .message
                .starts_with("logical-backup on unit unit-name failed: "),
            "{}",
            status.message
        );
        assert!(status.message.contains("mysqldump exited with 2"));

        let events = h.notifier.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (target, severity, reason, message) = &events[0];
        assert_eq!(target, "unit-name");
        assert_eq!(*severity, Severity::Warning);
        assert_eq!(reason, FAILED_REASON);
        assert_eq!(*message, status.message);
    }

    #[tokio::test]
    async fn missing_target_fails_without_dispatch() {
        let dispatcher = FakeDispatch::answering(|| Ok("unreachable".to_owned()));
        let h = harness(logical_backup(), Vec::new(), dispatcher.clone());

        h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();

        let status = h.store.status("backup");
        assert_eq!(status.result, Some(CallResult::Failed));
        assert!(status.message.contains("unit `namespace/unit-name` not found"));
        assert_eq!(dispatcher.count(), 0);
    }

    #[tokio::test]
    async fn missing_agent_port_fails_without_dispatch() {
        let dispatcher = FakeDispatch::answering(|| Ok("unreachable".to_owned()));
        let h = harness(
            logical_backup(),
            vec![unit("unit-name", "metrics")],
            dispatcher.clone(),
        );

        h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();

        let status = h.store.status("backup");
        assert_eq!(status.result, Some(CallResult::Failed));
        assert!(status.message.contains("port"), "{}", status.message);
        assert_eq!(dispatcher.count(), 0);
    }

    #[tokio::test]
    async fn claimed_call_is_not_dispatched_again() {
        let dispatcher = FakeDispatch::answering(|| Ok("again".to_owned()));
        let mut call = logical_backup();
        call.status = Some(GrpcCallStatus {
            start_time: Some(at(-60)),
            ..Default::default()
        });
        let h = harness(
            call,
            vec![unit("unit-name", AGENT_PORT_NAME)],
            dispatcher.clone(),
        );

        for _ in 0..3 {
            let action = h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();
            assert_eq!(action, Action::requeue(CONFIG.requeue_interval));
        }

        assert_eq!(dispatcher.count(), 0);
        assert_eq!(h.store.patches.load(Ordering::Relaxed), 0);
        assert_eq!(h.store.status("backup").result, None);
    }

    #[tokio::test]
    async fn expired_claim_is_failed() {
        let dispatcher = FakeDispatch::answering(|| Ok("again".to_owned()));
        let mut call = logical_backup();
        call.status = Some(GrpcCallStatus {
            start_time: Some(at(-3600)),
            ..Default::default()
        });
        let h = harness(
            call,
            vec![unit("unit-name", AGENT_PORT_NAME)],
            dispatcher.clone(),
        );

        h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();

        let status = h.store.status("backup");
        assert_eq!(dispatcher.count(), 0);
        assert_eq!(status.result, Some(CallResult::Failed));
        assert_eq!(status.start_time, Some(at(-3600)));
        assert_eq!(status.completion_time, Some(at(0)));
        assert!(status.message.contains("never completed"));
        assert_eq!(h.notifier.events.lock().unwrap()[0].2, ABANDONED_REASON);
    }

    #[tokio::test]
    async fn completed_call_lives_until_ttl() {
        let dispatcher = FakeDispatch::answering(|| Ok("done".to_owned()));
        let mut call = logical_backup();
        call.status = Some(GrpcCallStatus {
            result: Some(CallResult::Success),
            message: "done".to_owned(),
            start_time: Some(at(-10)),
            completion_time: Some(at(0)),
        });
        let h = harness(
            call,
            vec![unit("unit-name", AGENT_PORT_NAME)],
            dispatcher.clone(),
        );

        let action = h
            .reconciler
            .reconcile_at(NAMESPACE, "backup", at(0) + TimeDelta::seconds(599))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
        assert!(h.store.contains("backup"));

        let action = h
            .reconciler
            .reconcile_at(NAMESPACE, "backup", at(600))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert!(!h.store.contains("backup"));
        assert_eq!(dispatcher.count(), 0);
    }

    #[tokio::test]
    async fn missing_call_is_a_no_op() {
        let h = harness(
            logical_backup(),
            Vec::new(),
            FakeDispatch::answering(|| Ok(String::new())),
        );

        let action = h.reconciler.reconcile_at(NAMESPACE, "restore", at(0)).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(h.store.patches.load(Ordering::Relaxed), 0);
    }

    /// Agent stand-in: the channel of a call is the endpoint it was opened to.
    struct EndpointConnector;

    impl Connector for EndpointConnector {
        type Channel = AgentEndpoint;

        fn connect(&self, endpoint: &AgentEndpoint) -> DispatchResult<AgentEndpoint> {
            Ok(endpoint.clone())
        }
    }

    #[tokio::test]
    async fn mysql_logical_backup_end_to_end() {
        let mut table = DispatchTable::default();
        table.register(
            UnitKind::Mysql,
            Operation::LogicalBackup,
            |endpoint: AgentEndpoint, request: MysqlLogicalBackupRequest| async move {
                Ok(tonic::Response::new(ActionResponse {
                    message: format!(
                        "database {} of {} backed up by {}",
                        request.database, request.username, endpoint
                    ),
                }))
            },
        );
        let h = harness(
            logical_backup(),
            vec![unit("unit-name", AGENT_PORT_NAME)],
            Arc::new(Dispatcher::new(table, EndpointConnector)),
        );

        h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();

        let status = h.store.status("backup");
        assert_eq!(status.result, Some(CallResult::Success));
        assert_eq!(
            status.message,
            "database app of root backed up by unit-name.group-headless.namespace.svc:9090"
        );
    }

    #[tokio::test]
    async fn unknown_parameter_fails_the_call() {
        let mut table = DispatchTable::default();
        table.register(
            UnitKind::Mysql,
            Operation::LogicalBackup,
            |_: AgentEndpoint, _: MysqlLogicalBackupRequest| async move {
                Ok(tonic::Response::new(ActionResponse::default()))
            },
        );
        let h = harness(
            grpc_call(
                Operation::LogicalBackup,
                json!({ "username": "root", "tables": ["users"] }),
            ),
            vec![unit("unit-name", AGENT_PORT_NAME)],
            Arc::new(Dispatcher::new(table, EndpointConnector)),
        );

        h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();

        let status = h.store.status("backup");
        assert_eq!(status.result, Some(CallResult::Failed));
        assert!(status.message.contains("unknown field `tables`"), "{}", status.message);
    }

    #[tokio::test]
    async fn unsupported_operation_fails_the_call() {
        let h = harness(
            grpc_call(Operation::Clone, json!({})),
            vec![unit("unit-name", AGENT_PORT_NAME)],
            Arc::new(Dispatcher::new(
                DispatchTable::<AgentEndpoint>::default(),
                EndpointConnector,
            )),
        );

        h.reconciler.reconcile_at(NAMESPACE, "backup", at(0)).await.unwrap();

        let status = h.store.status("backup");
        assert_eq!(status.result, Some(CallResult::Failed));
        assert!(status.message.contains("not supported"), "{}", status.message);
    }
}
