//! Persistence of `GrpcCall`s.

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, Patch, PatchParams},
    Api, Client,
};
use serde::Serialize;
use unitops_kube::{
    crd::{GrpcCall, GrpcCallStatus},
    error::Result,
};

#[async_trait]
pub trait CallStore: Send + Sync {
    /// [`None`] when the call does not exist (anymore).
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<GrpcCall>>;

    /// Merges `status` into the persisted status, unset fields are left untouched.
    async fn patch_status(&self, namespace: &str, name: &str, status: &GrpcCallStatus)
        -> Result<()>;

    /// Deleting a call that is already gone succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct StatusPatch<'a> {
    status: &'a GrpcCallStatus,
}

/// [`CallStore`] backed by the Kubernetes API, status goes through the status subresource.
#[derive(Clone)]
pub struct KubeCallStore {
    client: Client,
}

impl KubeCallStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<GrpcCall> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CallStore for KubeCallStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<GrpcCall>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    #[tracing::instrument(level = "trace", skip(self), err)]
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GrpcCallStatus,
    ) -> Result<()> {
        self.api(namespace)
            .patch_status(
                name,
                &PatchParams::default(),
                &Patch::Merge(StatusPatch { status }),
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self), err)]
    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
