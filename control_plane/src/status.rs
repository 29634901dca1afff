use async_trait::async_trait;
use canopy_api::v1alpha1::{Application, ApplicationStatus};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Application is missing its {0}")]
    MissingMetadata(&'static str),
    #[error("Failed to patch status: {0}")]
    Kube(#[from] kube::Error),
}

/// Persists the status sub-object of an application.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write(
        &self,
        application: &Application,
        status: &ApplicationStatus,
    ) -> Result<(), StatusError>;
}

/// Merge patch that replaces only the status sub-object.
pub fn status_patch(status: &ApplicationStatus) -> Patch<Value> {
    Patch::Merge(json!({ "status": status }))
}

/// Namespace and name the status patch is addressed to.
fn status_target(application: &Application) -> Result<(String, &str), StatusError> {
    let namespace = application
        .namespace()
        .ok_or(StatusError::MissingMetadata("namespace"))?;
    let name = application
        .metadata
        .name
        .as_deref()
        .ok_or(StatusError::MissingMetadata("name"))?;
    Ok((namespace, name))
}

pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write(
        &self,
        application: &Application,
        status: &ApplicationStatus,
    ) -> Result<(), StatusError> {
        let (namespace, name) = status_target(application)?;

        let api: Api<Application> = Api::namespaced(self.client.clone(), &namespace);
        api.patch_status(name, &PatchParams::default(), &status_patch(status))
            .await?;

        debug!(
            "Wrote status of {}/{} with {} instances",
            namespace,
            name,
            status.instances.len()
        );
        Ok(())
    }
}
