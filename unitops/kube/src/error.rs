use kube::Resource;
use thiserror::Error;

use crate::endpoint::{AGENT_CONTAINER_NAME, AGENT_PORT_NAME};

pub type Result<T, E = KubeApiError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum KubeApiError {
    #[error("Kube failed: {0}")]
    KubeError(#[from] kube::Error),

    #[error("unit `{namespace}/{name}` not found")]
    TargetNotFound { namespace: String, name: String },

    #[error("unit `{0}` does not declare a `{container}` container", container = AGENT_CONTAINER_NAME)]
    AgentContainerMissing(String),

    #[error(
        "unit `{0}` does not declare a `{port}` port on its `{container}` container",
        port = AGENT_PORT_NAME,
        container = AGENT_CONTAINER_NAME
    )]
    AgentPortMissing(String),

    #[error("unit `{0}` is not labelled with the unit set it belongs to")]
    MissingUnitSet(String),

    #[error("{kind} `{name}` is missing field `{field}`")]
    MissingField {
        kind: String,
        name: String,
        field: &'static str,
    },
}

impl KubeApiError {
    /// Creates a [`KubeApiError::MissingField`] for the given resource.
    pub fn missing_field<R>(resource: &R, field: &'static str) -> Self
    where
        R: Resource<DynamicType = ()>,
    {
        Self::MissingField {
            kind: R::kind(&()).into_owned(),
            name: resource.meta().name.clone().unwrap_or_default(),
            field,
        }
    }
}
