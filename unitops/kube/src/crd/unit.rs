use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label naming the unit set a [`Unit`] belongs to. The unit set owns the headless service
/// that gives each unit its stable DNS name.
pub const UNIT_SET_LABEL: &str = "unitops.io/unit-set";

/// A single database instance, backed by one pod.
///
/// Only the parts this controller reads are modelled.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(group = "unitops.io", version = "v1alpha1", kind = "Unit", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    pub template: PodTemplateSpec,
}

impl Unit {
    pub fn unit_set(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()?
            .get(UNIT_SET_LABEL)
            .map(String::as_str)
    }
}
