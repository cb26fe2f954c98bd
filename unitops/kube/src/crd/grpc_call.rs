use std::{collections::BTreeMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::{
    gen::SchemaGenerator,
    schema::{InstanceType, Schema, SchemaObject},
    JsonSchema,
};
use serde::{Deserialize, Serialize};

/// Free form arguments of a [`GrpcCall`], validated against the request message of the
/// `(kind, operation)` pair when the call is dispatched.
pub type Parameters = BTreeMap<String, serde_json::Value>;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "unitops.io",
    version = "v1alpha1",
    kind = "GrpcCall",
    namespaced,
    status = "GrpcCallStatus",
    shortname = "gc",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.targetRef"}"#,
    printcolumn = r#"{"name":"Operation","type":"string","jsonPath":".spec.operation"}"#,
    printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.result"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GrpcCallSpec {
    /// Name of the [`Unit`](super::Unit) the call runs against, in the call's namespace.
    pub target_ref: String,

    pub kind: UnitKind,

    pub operation: Operation,

    /// Seconds to keep the call around once it has completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_after_finished: Option<u32>,

    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub parameters: Parameters,
}

impl GrpcCallSpec {
    pub fn ttl_after_finished(&self) -> Option<Duration> {
        self.ttl_after_finished
            .map(|seconds| Duration::from_secs(seconds.into()))
    }
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_owned(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    }
    .into()
}

/// Database engine running in the target unit, selects the agent service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Mysql,
    Postgresql,
    Mongodb,
    Redis,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let as_str = match self {
            Self::Mysql => "mysql",
            Self::Postgresql => "postgresql",
            Self::Mongodb => "mongodb",
            Self::Redis => "redis",
        };

        f.write_str(as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    LogicalBackup,
    PhysicalBackup,
    Restore,
    PhysicalRestore,
    Clone,
    GtidPurge,
    SetVariable,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let as_str = match self {
            Self::LogicalBackup => "logical-backup",
            Self::PhysicalBackup => "physical-backup",
            Self::Restore => "restore",
            Self::PhysicalRestore => "physical-restore",
            Self::Clone => "clone",
            Self::GtidPurge => "gtid-purge",
            Self::SetVariable => "set-variable",
        };

        f.write_str(as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum CallResult {
    Success,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrpcCallStatus {
    /// Unset until the call completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CallResult>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Set when the controller claims the call. Never cleared, a call with a start time is
    /// never dispatched again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn spec_from_manifest() {
        let spec: GrpcCallSpec = serde_json::from_value(json!({
            "targetRef": "mysql-0",
            "kind": "mysql",
            "operation": "logical-backup",
            "ttlAfterFinished": 60,
            "parameters": { "username": "root", "logicalBackupMode": 0 }
        }))
        .unwrap();

        assert_eq!(spec.kind, UnitKind::Mysql);
        assert_eq!(spec.operation, Operation::LogicalBackup);
        assert_eq!(spec.ttl_after_finished(), Some(Duration::from_secs(60)));
        assert_eq!(spec.parameters["username"], json!("root"));
    }

    #[rstest]
    #[case(Operation::LogicalBackup)]
    #[case(Operation::PhysicalRestore)]
    #[case(Operation::GtidPurge)]
    #[case(Operation::SetVariable)]
    fn operation_display_matches_wire(#[case] operation: Operation) {
        assert_eq!(
            serde_json::to_value(operation).unwrap(),
            json!(operation.to_string())
        );
    }

    #[test]
    fn unset_status_serializes_empty() {
        assert_eq!(
            serde_json::to_value(GrpcCallStatus::default()).unwrap(),
            json!({})
        );
    }
}
