use std::sync::Arc;

use futures::StreamExt;
use kube::{
    runtime::{watcher, Controller},
    Api, Client,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*};
use unitops_controller::{
    cli,
    dispatch::{DispatchTable, Dispatcher},
    error::ControllerError,
    notify::EventNotifier,
    reconcile::{error_policy, reconcile, Reconciler},
    store::KubeCallStore,
};
use unitops_kube::{
    crd::GrpcCall,
    endpoint::{EndpointResolver, KubeUnitSource},
    error::KubeApiError,
};

fn init_tracing() {
    let json_log = std::env::var("UNITOPS_JSON_LOG")
        .map(|json_log| json_log.parse().unwrap_or_default())
        .unwrap_or(false);

    if json_log {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .json(),
            )
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .pretty()
                    .with_line_number(true),
            )
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    init_tracing();

    let args = cli::parse_args();
    debug!(?args, "starting unitops-controller {}", env!("CARGO_PKG_VERSION"));

    let client = Client::try_default().await.map_err(KubeApiError::from)?;

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubeCallStore::new(client.clone())),
        EndpointResolver::new(Arc::new(KubeUnitSource::new(client.clone()))),
        Arc::new(Dispatcher::new(DispatchTable::builtin(), args.connector())),
        Arc::new(EventNotifier::new(client.clone(), args.reporter.clone())),
        args.reconciler_config(),
    ));

    let calls: Api<GrpcCall> = match args.namespace.as_deref() {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    Controller::new(calls, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((call, _)) => debug!(%call, "reconciled"),
                Err(error) => warn!(%error, "controller error"),
            }
        })
        .await;

    info!("unitops-controller shut down");
    Ok(())
}
