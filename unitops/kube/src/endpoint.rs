//! Locates the agent serving a [`Unit`].
//!
//! Every unit pod runs an agent sidecar named [`AGENT_CONTAINER_NAME`] that listens on the
//! container port named [`AGENT_PORT_NAME`]. The pod is reachable through the headless
//! service of its unit set, so the address is derived from names alone.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use kube::{Api, Client};

use crate::{
    crd::Unit,
    error::{KubeApiError, Result},
};

pub const AGENT_CONTAINER_NAME: &str = "unit-agent";
pub const AGENT_PORT_NAME: &str = "unit-agent";

/// Network address of a unit agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentEndpoint {
    pub host: String,
    pub port: String,
}

impl AgentEndpoint {
    /// `http://` uri for a gRPC channel to this agent.
    pub fn uri(&self) -> String {
        format!("http://{self}")
    }
}

impl fmt::Display for AgentEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// `<unit>.<unit set>-headless.<namespace>.svc`
pub fn agent_host(unit: &str, unit_set: &str, namespace: &str) -> String {
    format!("{unit}.{unit_set}-headless.{namespace}.svc")
}

/// Computes the agent address from an already fetched [`Unit`].
pub fn resolve_endpoint(unit: &Unit) -> Result<AgentEndpoint> {
    let name = unit
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| KubeApiError::missing_field(unit, ".metadata.name"))?;
    let namespace = unit
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| KubeApiError::missing_field(unit, ".metadata.namespace"))?;
    let unit_set = unit
        .unit_set()
        .ok_or_else(|| KubeApiError::MissingUnitSet(name.to_owned()))?;

    let container = unit
        .spec
        .template
        .spec
        .as_ref()
        .and_then(|spec| {
            spec.containers
                .iter()
                .find(|container| container.name == AGENT_CONTAINER_NAME)
        })
        .ok_or_else(|| KubeApiError::AgentContainerMissing(name.to_owned()))?;

    let port = container
        .ports
        .iter()
        .flatten()
        .find(|port| port.name.as_deref() == Some(AGENT_PORT_NAME))
        .ok_or_else(|| KubeApiError::AgentPortMissing(name.to_owned()))?;

    Ok(AgentEndpoint {
        host: agent_host(name, unit_set, namespace),
        port: port.container_port.to_string(),
    })
}

/// Read access to [`Unit`]s.
#[async_trait]
pub trait UnitSource: Send + Sync {
    /// [`None`] when the unit does not exist.
    async fn get_unit(&self, namespace: &str, name: &str) -> Result<Option<Unit>>;
}

/// [`UnitSource`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeUnitSource {
    client: Client,
}

impl KubeUnitSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UnitSource for KubeUnitSource {
    async fn get_unit(&self, namespace: &str, name: &str) -> Result<Option<Unit>> {
        let api: Api<Unit> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Fetches a unit by name and resolves its agent.
#[derive(Clone)]
pub struct EndpointResolver {
    units: Arc<dyn UnitSource>,
}

impl EndpointResolver {
    pub fn new(units: Arc<dyn UnitSource>) -> Self {
        Self { units }
    }

    #[tracing::instrument(level = "debug", skip(self), ret, err)]
    pub async fn resolve(&self, namespace: &str, target_ref: &str) -> Result<AgentEndpoint> {
        let unit = self
            .units
            .get_unit(namespace, target_ref)
            .await?
            .ok_or_else(|| KubeApiError::TargetNotFound {
                namespace: namespace.to_owned(),
                name: target_ref.to_owned(),
            })?;

        resolve_endpoint(&unit)
    }
}
